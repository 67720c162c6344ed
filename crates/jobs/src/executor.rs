// crates/jobs/src/executor.rs
//! Drives jobs through `Pending -> Running -> Completed | Failed`.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use std::time::Instant;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::registry::JobRegistry;
use super::types::{JobError, JobId, Metadata};

/// Handle a running task uses to report its own progress.
#[derive(Clone)]
pub struct ProgressReporter {
    id: JobId,
    registry: Arc<JobRegistry>,
}

impl ProgressReporter {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Update progress (0-100) and the status line. Returns `false` once the
    /// job is finished or gone.
    pub fn report(&self, progress: u8, message: impl Into<String>) -> bool {
        self.registry.update_progress(self.id, progress, message)
    }
}

/// Runs caller-supplied tasks and records their outcome in the registry.
///
/// There is no admission limit: every launched job starts immediately.
/// A task that errors or panics only fails its own job; nothing escapes
/// `run` into the caller.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<JobRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        install_panic_hook();
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn reporter(&self, id: JobId) -> ProgressReporter {
        ProgressReporter {
            id,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Run one job to completion.
    ///
    /// The closure `f` receives a `ProgressReporter` for the job and is only
    /// invoked after the job has been marked running. Its output becomes the
    /// job result; an `Err` or a panic becomes a `Failed` record.
    pub async fn run<F, Fut>(&self, id: JobId, f: F)
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let Some(job) = self.registry.get(id) else {
            tracing::warn!(job_id = %id, "job not found, nothing to run");
            return;
        };

        let span = tracing::info_span!("job", job_id = %id, job_type = %job.job_type);
        self.drive(id, f).instrument(span).await;
    }

    /// Launch `run` in the background and return immediately.
    pub fn spawn<F, Fut>(&self, id: JobId, f: F) -> JoinHandle<()>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move { executor.run(id, f).await })
    }

    /// Create a job and launch it in the background.
    pub fn submit<F, Fut>(&self, job_type: impl Into<String>, metadata: Metadata, f: F) -> JobId
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let id = self.registry.create(job_type, metadata);
        self.spawn(id, f);
        id
    }

    async fn drive<F, Fut>(&self, id: JobId, f: F)
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        // A job that is already running or finished must not run twice.
        if !self.registry.start(id) {
            return;
        }
        tracing::info!("job started");
        let started = Instant::now();

        // The task runs on its own tokio task. Panics are caught inside it so
        // the site recorded by the hook is read on the thread that panicked;
        // the JoinHandle still catches anything that slips past.
        let reporter = self.reporter(id);
        let outcome = tokio::spawn(async move {
            AssertUnwindSafe(async move { f(reporter).await })
                .catch_unwind()
                .await
                .map_err(|payload| JobError::panic(panic_message(payload), take_panic_site()))
        })
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(Ok(result))) => {
                self.registry.complete(id, result);
                tracing::info!(elapsed_ms, "job completed");
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(elapsed_ms, error = %err, "job failed");
                self.registry.fail(id, JobError::from_task_error(&err));
            }
            Ok(Err(panicked)) => {
                tracing::error!(elapsed_ms, panic = %panicked.message, "job panicked");
                self.registry.fail(id, panicked);
            }
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                tracing::error!(elapsed_ms, panic = %message, "job panicked");
                self.registry.fail(id, JobError::panic(message, None));
            }
            Err(join_err) => {
                // Only reachable when the runtime is shutting down.
                tracing::warn!(elapsed_ms, error = %join_err, "job aborted");
                let err = anyhow::Error::new(join_err).context("job task aborted");
                self.registry.fail(id, JobError::from_task_error(&err));
            }
        }
    }
}

thread_local! {
    static PANIC_SITE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Chain a hook in front of the current one that remembers where the last
/// panic on this thread happened, with a stack trace.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "<unknown>".to_string());
            let site = format!(
                "panicked at {location}\n\nstack backtrace:\n{}",
                Backtrace::force_capture()
            );
            PANIC_SITE.with(|cell| *cell.borrow_mut() = Some(site));
            previous(info);
        }));
    });
}

fn take_panic_site() -> Option<String> {
    PANIC_SITE.with(|cell| cell.borrow_mut().take())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobErrorKind, JobStatus};
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Arc<JobRegistry>, Executor) {
        let registry = Arc::new(JobRegistry::new());
        let executor = Executor::new(Arc::clone(&registry));
        (registry, executor)
    }

    #[tokio::test]
    async fn test_run_success() {
        let (registry, executor) = setup();
        let id = registry.create("grading", Metadata::new());

        executor
            .run(id, |_progress| async { Ok(json!({"score": 80})) })
            .await;

        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"score": 80})));
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
        let started = job.started_at.unwrap();
        assert!(job.created_at <= started);
        assert!(started <= job.completed_at.unwrap());
    }

    #[tokio::test]
    async fn test_run_failure() {
        let (registry, executor) = setup();
        let id = registry.create("grading", Metadata::new());

        executor
            .run(id, |_progress| async { Err(anyhow::anyhow!("boom")) })
            .await;

        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        let error = job.error.unwrap();
        assert_eq!(error.kind, JobErrorKind::TaskError);
        assert!(error.message.contains("boom"));
        assert!(error.trace.contains("boom"));
        assert!(error.trace.contains("Stack backtrace:"), "trace: {}", error.trace);
    }

    #[tokio::test]
    async fn test_run_panic_is_contained() {
        let (registry, executor) = setup();
        let id = registry.create("grading", Metadata::new());

        executor
            .run(id, |_progress| async {
                if true {
                    panic!("kaboom");
                }
                Ok(json!(null))
            })
            .await;

        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.kind, JobErrorKind::Panic);
        assert_eq!(error.message, "kaboom");
        // Location of the `panic!` above, plus a stack trace.
        assert!(error.trace.contains("executor.rs:"), "trace: {}", error.trace);
        assert!(error.trace.contains("stack backtrace:"));
        assert!(error.trace.ends_with("kaboom"));
    }

    #[tokio::test]
    async fn test_panic_with_formatted_payload() {
        let (registry, executor) = setup();
        let id = registry.create("grading", Metadata::new());

        executor
            .run(id, |progress| async move {
                if progress.report(10, "warming up") {
                    panic!("step {} of {}", 1, 3);
                }
                Ok(json!(null))
            })
            .await;

        let error = registry.get(id).unwrap().error.unwrap();
        assert_eq!(error.kind, JobErrorKind::Panic);
        assert_eq!(error.message, "step 1 of 3");
        assert!(error.trace.contains(".rs:"), "trace: {}", error.trace);
    }

    #[tokio::test]
    async fn test_run_unknown_job_does_nothing() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let (registry, executor) = setup();
        let id = registry.create("grading", Metadata::new());
        // A different, never-created id.
        let ghost = JobId::new();
        let invoked = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&invoked);
        executor
            .run(ghost, move |_progress| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(json!(null))
            })
            .await;

        assert!(!invoked.load(Ordering::SeqCst));
        assert!(registry.get(ghost).is_none());
        assert_eq!(registry.get(id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_twice_does_not_rerun_task() {
        let (registry, executor) = setup();
        let id = registry.create("grading", Metadata::new());
        executor.run(id, |_| async { Ok(json!(1)) }).await;
        executor.run(id, |_| async { Ok(json!(2)) }).await;

        assert_eq!(registry.get(id).unwrap().result, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_task_reports_progress() {
        let (registry, executor) = setup();
        let id = registry.create("grading", Metadata::new());
        let observer = Arc::clone(&registry);

        executor
            .run(id, move |progress| async move {
                assert!(progress.report(50, "halfway"));
                let mid = observer.get(progress.id()).unwrap();
                assert_eq!(mid.status, JobStatus::Running);
                assert_eq!(mid.progress, 50);
                assert_eq!(mid.progress_message.as_deref(), Some("halfway"));
                Ok(json!("done"))
            })
            .await;

        let job = registry.get(id).unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.progress_message.as_deref(), Some("Completed"));
    }

    #[tokio::test]
    async fn test_spawn_is_fire_and_forget() {
        let (registry, executor) = setup();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let id = executor.submit("slow", Metadata::new(), |_progress| async move {
            let _ = release_rx.await;
            Ok(json!({"ok": true}))
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.get(id).unwrap().status, JobStatus::Running);

        release_tx.send(()).unwrap();
        for _ in 0..100 {
            if registry.get(id).unwrap().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(registry.get(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_from_siblings() {
        let (registry, executor) = setup();

        let ok_a = registry.create("batch", Metadata::new());
        let bad = registry.create("batch", Metadata::new());
        let ok_b = registry.create("batch", Metadata::new());

        let handles = vec![
            executor.spawn(ok_a, |_| async { Ok(json!("a")) }),
            executor.spawn(bad, |_| async { Err(anyhow::anyhow!("boom")) }),
            executor.spawn(ok_b, |_| async { Ok(json!("b")) }),
        ];
        for handle in handles {
            // `run` never propagates task failures.
            handle.await.unwrap();
        }

        assert_eq!(registry.get(ok_a).unwrap().status, JobStatus::Completed);
        assert_eq!(registry.get(bad).unwrap().status, JobStatus::Failed);
        assert_eq!(registry.get(ok_b).unwrap().status, JobStatus::Completed);
    }
}
