//! Batch extraction CLI
//!
//! Extracts every document in a directory against one schema, writing one
//! result file per document, a resumable progress ledger and a run summary
//! into the output directory.

mod config;
mod documents;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use form_extraction::{
    BatchConfig, BatchError, BatchOrchestrator, BatchReport, EffortLevel, ExtractionStrategy,
    Extractor, ExtractorExt, FileResultStore, OpenAIExtractor, ProgressLedger, ResultStore,
    RetryPolicy, SchemaRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::documents::load_documents;

#[derive(Parser)]
#[command(name = "extract-batch")]
#[command(about = "Extract structured records from a directory of documents")]
struct Cli {
    /// Directory of documents (.txt, .md, .json, .pdf)
    #[arg(long)]
    documents: PathBuf,

    /// Schema file (JSON)
    #[arg(long)]
    schema: PathBuf,

    /// Output directory for results, summaries and the progress ledger
    #[arg(long, default_value = "extraction-output")]
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = Effort::Medium)]
    effort: Effort,

    /// Start over: forget previous progress and remove stored results
    #[arg(long)]
    no_resume: bool,

    /// Documents processed at once
    #[arg(long, default_value_t = 3)]
    concurrency: usize,

    #[arg(long, value_enum, default_value_t = Strategy::Fallback)]
    strategy: Strategy,

    /// Attempts per extractor for retryable failures
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Deadline for one extractor call
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Pause between batches
    #[arg(long, default_value_t = 2000)]
    batch_delay_ms: u64,

    /// Request quota per extractor (0 disables)
    #[arg(long, default_value_t = 0)]
    requests_per_second: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Effort {
    Low,
    Medium,
    High,
}

impl From<Effort> for EffortLevel {
    fn from(effort: Effort) -> Self {
        match effort {
            Effort::Low => EffortLevel::Low,
            Effort::Medium => EffortLevel::Medium,
            Effort::High => EffortLevel::High,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Fallback,
    Consensus,
}

impl From<Strategy> for ExtractionStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Fallback => ExtractionStrategy::Fallback,
            Strategy::Consensus => ExtractionStrategy::Consensus,
        }
    }
}

impl Cli {
    fn batch_config(&self) -> BatchConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            ..RetryPolicy::default()
        };
        BatchConfig::new()
            .with_concurrency(self.concurrency.max(1))
            .with_inter_batch_delay(Duration::from_millis(self.batch_delay_ms))
            .with_extract_timeout(Duration::from_secs(self.timeout_secs.max(1)))
            .with_retry(retry)
            .with_strategy(self.strategy.into())
            .with_effort(self.effort.into())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,form_extraction=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let mut schemas = SchemaRegistry::new();
    let schema = schemas
        .load_file(&cli.schema)
        .with_context(|| format!("Failed to load schema {}", cli.schema.display()))?;
    let documents = load_documents(&cli.documents, &schema.id)?;

    let extractors = build_extractors(&config, cli.requests_per_second);
    tracing::info!(
        schema = %schema.id,
        documents = documents.len(),
        extractors = ?extractors.iter().map(|e| e.id()).collect::<Vec<_>>(),
        "Loaded batch"
    );

    let store = Arc::new(FileResultStore::new(&cli.output));
    let mut ledger = ProgressLedger::open(&cli.output)
        .await
        .context("Failed to open progress ledger")?;
    if cli.no_resume {
        tracing::info!(output = %cli.output.display(), "Starting over, clearing previous progress");
        ledger.reset().await?;
        store.clear().await?;
    }

    let orchestrator = BatchOrchestrator::new(extractors, Arc::new(schemas), store)
        .with_config(cli.batch_config());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight documents");
            on_signal.cancel();
        }
    });

    finish(orchestrator.run(documents, &mut ledger, cancel).await)
}

/// Report a run's outcome. Only a fatal abort or a storage failure is an error;
/// an interrupted run keeps its progress and exits cleanly.
fn finish(outcome: std::result::Result<BatchReport, BatchError>) -> Result<()> {
    match outcome {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(BatchError::Fatal { document_id, source }) => {
            eprintln!(
                "{} {} ({})",
                "Batch aborted:".bright_red().bold(),
                source,
                document_id
            );
            Err(anyhow::anyhow!("fatal extractor error on {}: {}", document_id, source))
        }
        Err(BatchError::Cancelled) => {
            println!(
                "{} progress is saved, rerun to resume",
                "Batch interrupted:".bright_yellow().bold()
            );
            Ok(())
        }
        Err(e) => Err(e).context("Batch run failed"),
    }
}

fn build_extractors(config: &Config, requests_per_second: u32) -> Vec<Arc<dyn Extractor>> {
    config
        .models
        .iter()
        .map(|model| {
            let mut extractor = OpenAIExtractor::new(&config.credentials, model);
            if let Some(limit) = config.max_content_bytes {
                extractor = extractor.with_max_content_bytes(limit);
            }
            if requests_per_second > 0 {
                Arc::new(extractor.rate_limited(requests_per_second)) as Arc<dyn Extractor>
            } else {
                Arc::new(extractor) as Arc<dyn Extractor>
            }
        })
        .collect()
}

fn print_report(report: &BatchReport) {
    let summary = &report.summary;
    println!();
    println!("{}", "Extraction summary".bright_cyan().bold());
    println!("  run:         {}", report.run_id);
    println!("  processed:   {} (skipped {})", report.processed, report.skipped);
    println!("  documents:   {}", summary.total_documents);
    println!("  completed:   {}", summary.completed.to_string().bright_green());
    println!(
        "  failed:      {}",
        if summary.failed > 0 {
            summary.failed.to_string().bright_red()
        } else {
            summary.failed.to_string().normal()
        }
    );
    println!(
        "  valid:       {} / invalid {}",
        summary.valid.to_string().bright_green(),
        summary.invalid
    );
    if let Some(confidence) = summary.average_confidence {
        println!("  confidence:  {:.1}", confidence);
    }
    if let Some(completeness) = summary.average_completeness {
        println!("  completeness: {:.1}%", completeness);
    }
    for (source, count) in &summary.by_source {
        println!("  from {}: {}", source, count);
    }
    println!(
        "  tokens:      {} in / {} out, ${:.4}",
        summary.usage.input_tokens, summary.usage.output_tokens, summary.usage.cost_usd
    );
    println!("  elapsed:     {:.1}s", summary.total_duration_ms as f64 / 1000.0);
    if let (Some(cost), Some(duration)) = (summary.average_cost_usd, summary.average_duration_ms) {
        println!("  per document: ${:.4}, {:.0}ms", cost, duration);
    }

    if !summary.failures.is_empty() {
        println!();
        println!("{}", "Failures".bright_yellow().bold());
        for failure in &summary.failures {
            println!("  {} [{}] {}", failure.document_id, failure.kind, failure.message);
        }
    }
}
