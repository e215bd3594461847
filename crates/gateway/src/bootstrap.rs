//! Bounded-time execution of bootstrap requests.
//!
//! Each call is handed to the session collaborator on its own task and
//! tracked in a pending map keyed by a fresh id, the same way node invokes
//! are correlated with their replies. The HTTP caller waits on a oneshot
//! receiver for at most `request_timeout`. When the deadline passes the
//! entry is dropped and the collaborator keeps running detached; its late
//! result is logged and discarded. A collaborator that panics resolves its
//! caller with a failure instead of leaving it to time out.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use {
    futures::FutureExt,
    loopgate_service_traits::{BootstrapOutcome, BootstrapRequest, BootstrapService},
    tokio::sync::oneshot,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::error::ApiError;

#[derive(Debug)]
enum BootstrapFailure {
    Rejected(String),
    ShuttingDown,
}

type Reply = Result<BootstrapOutcome, BootstrapFailure>;

/// `None` once the executor has been closed.
type PendingMap = Arc<Mutex<Option<HashMap<Uuid, PendingBootstrap>>>>;

struct PendingBootstrap {
    sender: oneshot::Sender<Reply>,
    created_at: Instant,
}

pub struct BootstrapExecutor {
    service: Arc<dyn BootstrapService>,
    timeout: Duration,
    pending: PendingMap,
}

impl BootstrapExecutor {
    pub fn new(service: Arc<dyn BootstrapService>, timeout: Duration) -> Self {
        Self {
            service,
            timeout,
            pending: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }

    /// Number of requests currently waiting on the collaborator.
    pub fn pending_count(&self) -> usize {
        self.lock().as_ref().map_or(0, HashMap::len)
    }

    pub async fn execute(&self, request: BootstrapRequest) -> Result<BootstrapOutcome, ApiError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.lock();
            let Some(pending) = guard.as_mut() else {
                return Err(ApiError::shutting_down());
            };
            pending.insert(id, PendingBootstrap {
                sender: tx,
                created_at: Instant::now(),
            });
        }

        debug!(%id, cwd = %request.cwd.display(), commands = request.commands.len(), "dispatching bootstrap");
        self.spawn_collaborator(id, request);

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        // Always forget the entry; on timeout the collaborator is detached.
        let entry = self.take(&id);

        match outcome {
            Ok(Ok(Ok(result))) => {
                info!(%id, session_id = %result.session_id, "bootstrap completed");
                Ok(result)
            },
            Ok(Ok(Err(BootstrapFailure::Rejected(message)))) => {
                warn!(%id, error = %message, "bootstrap rejected by session service");
                Err(ApiError::BootstrapFailed(message))
            },
            Ok(Ok(Err(BootstrapFailure::ShuttingDown))) => Err(ApiError::shutting_down()),
            Ok(Err(_)) => {
                warn!(%id, "bootstrap task ended without a result");
                Err(ApiError::BootstrapFailed("bootstrap failed".into()))
            },
            Err(_) => {
                let waited = entry.map(|e| e.created_at.elapsed()).unwrap_or(self.timeout);
                warn!(%id, waited_ms = waited.as_millis() as u64, "bootstrap timed out");
                Err(ApiError::Timeout {
                    after: self.timeout,
                })
            },
        }
    }

    /// Resolve every waiting request with "shutting down" and refuse new ones.
    pub fn close(&self) -> usize {
        let drained = self.lock().take().unwrap_or_default();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.sender.send(Err(BootstrapFailure::ShuttingDown));
        }
        if count > 0 {
            info!(count, "failed pending bootstraps on shutdown");
        }
        count
    }

    fn spawn_collaborator(&self, id: Uuid, request: BootstrapRequest) {
        let service = Arc::clone(&self.service);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let reply = match AssertUnwindSafe(service.bootstrap(request))
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(|e| BootstrapFailure::Rejected(e.to_string())),
                Err(_) => {
                    warn!(%id, "session service panicked during bootstrap");
                    Err(BootstrapFailure::Rejected("bootstrap failed".into()))
                },
            };

            let entry = lock(&pending).as_mut().and_then(|map| map.remove(&id));
            match entry {
                Some(entry) => {
                    let _ = entry.sender.send(reply);
                },
                None => {
                    debug!(%id, ok = reply.is_ok(), "discarding late bootstrap result");
                },
            }
        });
    }

    fn take(&self, id: &Uuid) -> Option<PendingBootstrap> {
        self.lock().as_mut().and_then(|map| map.remove(id))
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashMap<Uuid, PendingBootstrap>>> {
        lock(&self.pending)
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, Option<HashMap<Uuid, PendingBootstrap>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        loopgate_service_traits::{FnBootstrapService, NoopBootstrapService, ServiceError},
        std::path::PathBuf,
    };

    use super::*;

    fn request() -> BootstrapRequest {
        BootstrapRequest {
            cwd: PathBuf::from("/tmp"),
            commands: vec!["ls".into()],
        }
    }

    fn sleeping(delay: Duration) -> Arc<dyn BootstrapService> {
        Arc::new(FnBootstrapService(move |_req: BootstrapRequest| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, ServiceError>(BootstrapOutcome::new("late"))
        }))
    }

    #[tokio::test]
    async fn success_returns_session_id() {
        let service: Arc<dyn BootstrapService> =
            Arc::new(FnBootstrapService(|_req: BootstrapRequest| async {
                Ok::<_, ServiceError>(BootstrapOutcome::new("s-1"))
            }));
        let executor = BootstrapExecutor::new(service, Duration::from_secs(1));
        let outcome = executor.execute(request()).await.unwrap();
        assert_eq!(outcome.session_id, "s-1");
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn collaborator_error_is_bootstrap_failure() {
        let executor = BootstrapExecutor::new(Arc::new(NoopBootstrapService), Duration::from_secs(1));
        let err = executor.execute(request()).await.unwrap_err();
        assert!(matches!(err, ApiError::BootstrapFailed(ref m) if m.contains("not configured")));
    }

    #[tokio::test]
    async fn panicking_collaborator_fails_without_waiting_for_timeout() {
        let service: Arc<dyn BootstrapService> =
            Arc::new(FnBootstrapService(|_req: BootstrapRequest| async {
                if true {
                    panic!("session service crashed");
                }
                Ok::<_, ServiceError>(BootstrapOutcome::new("never"))
            }));
        let executor = BootstrapExecutor::new(service, Duration::from_secs(5));
        let started = Instant::now();
        let err = executor.execute(request()).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(err, ApiError::BootstrapFailed(ref m) if m == "bootstrap failed"));
        assert_eq!(err.status().as_u16(), 500);
        assert_eq!(executor.pending_count(), 0);

        // The executor keeps serving after a crash.
        let err = executor.execute(request()).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn slow_collaborator_times_out_and_is_detached() {
        let executor = BootstrapExecutor::new(sleeping(Duration::from_millis(200)), Duration::from_millis(50));
        let started = Instant::now();
        let err = executor.execute(request()).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(executor.pending_count(), 0);

        // The late result is discarded without touching the executor.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn close_fails_waiting_requests() {
        let executor = Arc::new(BootstrapExecutor::new(
            sleeping(Duration::from_secs(5)),
            Duration::from_secs(10),
        ));
        let waiting = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(request()).await })
        };
        while executor.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(executor.close(), 1);
        let err = waiting.await.unwrap().unwrap_err();
        assert_eq!(err.status().as_u16(), 503);

        let err = executor.execute(request()).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 503);
    }
}
