//! Scoped provider file uploads.
//!
//! Binary documents are uploaded to the provider for the duration of one
//! extraction call and always deleted afterwards: on success, on error,
//! and when the call is dropped by a timeout or cancellation.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ExtractionError;

/// Provider-side file storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileHost: Send + Sync {
    /// Upload bytes, returning the provider's file id.
    async fn upload(&self, filename: &str, media_type: &str, bytes: Vec<u8>) -> Result<String, ExtractionError>;

    /// Delete a previously uploaded file.
    async fn delete(&self, file_id: &str) -> Result<(), ExtractionError>;
}

/// Deletes the file in the background if the scope is dropped early.
struct UploadGuard<H: FileHost + ?Sized + 'static> {
    host: Arc<H>,
    file_id: Option<String>,
}

impl<H: FileHost + ?Sized + 'static> UploadGuard<H> {
    async fn release(mut self) {
        if let Some(file_id) = self.file_id.take() {
            delete_logged(self.host.as_ref(), &file_id).await;
        }
    }
}

impl<H: FileHost + ?Sized + 'static> Drop for UploadGuard<H> {
    fn drop(&mut self) {
        let Some(file_id) = self.file_id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let host = self.host.clone();
                handle.spawn(async move {
                    delete_logged(host.as_ref(), &file_id).await;
                });
            }
            Err(_) => warn!(file_id = %file_id, "No runtime to release uploaded file"),
        }
    }
}

async fn delete_logged<H: FileHost + ?Sized>(host: &H, file_id: &str) {
    match host.delete(file_id).await {
        Ok(()) => debug!(file_id, "Released uploaded file"),
        Err(e) => warn!(file_id, error = %e, "Failed to release uploaded file"),
    }
}

/// Upload `bytes`, run `work` with the file id, then delete the file.
///
/// Delete failures are logged and never replace the work's own result.
pub async fn with_uploaded_file<H, F, Fut, T>(
    host: Arc<H>,
    filename: &str,
    media_type: &str,
    bytes: Vec<u8>,
    work: F,
) -> Result<T, ExtractionError>
where
    H: FileHost + ?Sized + 'static,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, ExtractionError>>,
{
    let file_id = host.upload(filename, media_type, bytes).await?;
    let guard = UploadGuard {
        host,
        file_id: Some(file_id.clone()),
    };

    let outcome = work(file_id).await;
    guard.release().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn host_expecting_one_delete(deleted: Arc<AtomicBool>, delete_result: Result<(), ExtractionError>) -> MockFileHost {
        let mut host = MockFileHost::new();
        host.expect_upload()
            .times(1)
            .returning(|_, _, _| Ok("file-1".to_string()));
        host.expect_delete().times(1).returning(move |file_id| {
            assert_eq!(file_id, "file-1");
            deleted.store(true, Ordering::SeqCst);
            delete_result.clone()
        });
        host
    }

    #[tokio::test]
    async fn test_deletes_after_success() {
        let deleted = Arc::new(AtomicBool::new(false));
        let host = Arc::new(host_expecting_one_delete(deleted.clone(), Ok(())));

        let out = with_uploaded_file(host, "a.pdf", "application/pdf", vec![1, 2], |id| async move {
            Ok(format!("used {}", id))
        })
        .await
        .unwrap();

        assert_eq!(out, "used file-1");
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deletes_after_failure() {
        let deleted = Arc::new(AtomicBool::new(false));
        let host = Arc::new(host_expecting_one_delete(deleted.clone(), Ok(())));

        let err = with_uploaded_file(host, "a.pdf", "application/pdf", vec![1], |_| async {
            Err::<(), _>(ExtractionError::SchemaMismatch("bad reply".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractionError::SchemaMismatch(_)));
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_work_result() {
        let deleted = Arc::new(AtomicBool::new(false));
        let host = Arc::new(host_expecting_one_delete(
            deleted.clone(),
            Err(ExtractionError::Transient("503".into())),
        ));

        let out = with_uploaded_file(host, "a.pdf", "application/pdf", vec![1], |_| async { Ok(7) })
            .await
            .unwrap();

        assert_eq!(out, 7);
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deletes_when_dropped_by_timeout() {
        let deleted = Arc::new(AtomicBool::new(false));
        let host = Arc::new(host_expecting_one_delete(deleted.clone(), Ok(())));

        let scoped = with_uploaded_file(host, "a.pdf", "application/pdf", vec![1], |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), scoped).await.is_err());

        for _ in 0..50 {
            if deleted.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_upload_failure_skips_work() {
        let mut host = MockFileHost::new();
        host.expect_upload()
            .returning(|_, _, _| Err(ExtractionError::Fatal("401".into())));
        host.expect_delete().never();

        let err = with_uploaded_file(Arc::new(host), "a.pdf", "application/pdf", vec![1], |_| async {
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractionError::Fatal(_)));
    }
}
