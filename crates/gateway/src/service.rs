//! Lifecycle of the automation endpoint.
//!
//! `start`, `stop` and `set_enabled` are serialized by one async mutex that
//! owns the running listener. Readers (`status`, `credentials`,
//! `lifecycle_state`) look at a small snapshot behind a sync lock so the
//! host UI can poll without waiting on a transition in progress.

use std::{
    net::SocketAddr,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use {
    loopgate_auth::{AutomationCredentials, CredentialFile, LOOPBACK_HOST},
    loopgate_config::{AutomationPaths, load_or_init},
    loopgate_service_traits::BootstrapService,
    serde::{Deserialize, Serialize},
    tokio::{net::TcpListener, sync::Mutex, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::Result,
    server::{Endpoint, build_app},
};

/// How long `stop` waits for in-flight connections before aborting the
/// server task.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// What the settings UI shows: on only when the persisted config says so
/// and live credentials exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationStatus {
    pub enabled: bool,
}

struct Running {
    endpoint: Arc<Endpoint>,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

#[derive(Debug)]
struct Snapshot {
    state: LifecycleState,
    config_enabled: bool,
    credentials: Option<AutomationCredentials>,
}

pub struct AutomationService {
    paths: AutomationPaths,
    credential_file: CredentialFile,
    bootstrap: Arc<dyn BootstrapService>,
    running: Mutex<Option<Running>>,
    snapshot: RwLock<Snapshot>,
}

impl AutomationService {
    pub fn new(paths: AutomationPaths, bootstrap: Arc<dyn BootstrapService>) -> Self {
        Self {
            credential_file: CredentialFile::new(paths.clone()),
            paths,
            bootstrap,
            running: Mutex::new(None),
            snapshot: RwLock::new(Snapshot {
                state: LifecycleState::Stopped,
                config_enabled: false,
                credentials: None,
            }),
        }
    }

    pub fn paths(&self) -> &AutomationPaths {
        &self.paths
    }

    /// Load the config and, if enabled, open the loopback listener.
    ///
    /// A no-op while already running. Any config or guard failure is
    /// returned before a listener is opened.
    pub async fn start(&self) -> Result<AutomationStatus> {
        let mut running = self.running.lock().await;
        self.start_locked(&mut running).await?;
        Ok(self.status())
    }

    /// Close the listener and invalidate the credentials. Safe to call at any
    /// time.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        self.stop_locked(&mut running).await
    }

    /// Persist `enabled` and bring the listener in line with it.
    pub async fn set_enabled(&self, enabled: bool) -> Result<AutomationStatus> {
        let mut running = self.running.lock().await;
        let config = loopgate_config::set_enabled(&self.paths, enabled)?;
        self.write_snapshot().config_enabled = config.enabled;

        match (enabled, running.is_some()) {
            (true, false) => self.start_locked(&mut running).await?,
            (false, true) => self.stop_locked(&mut running).await?,
            _ => debug!(enabled, "automation already in requested state"),
        }
        Ok(self.status())
    }

    pub fn status(&self) -> AutomationStatus {
        let snapshot = self.read_snapshot();
        AutomationStatus {
            enabled: snapshot.config_enabled && snapshot.credentials.is_some(),
        }
    }

    /// Live credentials, `None` unless running.
    pub fn credentials(&self) -> Option<AutomationCredentials> {
        self.read_snapshot().credentials.clone()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.read_snapshot().state
    }

    async fn start_locked(&self, running: &mut Option<Running>) -> Result<()> {
        if running.is_some() {
            debug!("automation service already running");
            return Ok(());
        }
        self.write_snapshot().state = LifecycleState::Starting;

        match self.open().await {
            Ok(Some((run, credentials))) => {
                let mut snapshot = self.write_snapshot();
                snapshot.state = LifecycleState::Running;
                snapshot.config_enabled = true;
                snapshot.credentials = Some(credentials);
                *running = Some(run);
                Ok(())
            },
            Ok(None) => {
                self.mark_stopped(Some(false));
                Ok(())
            },
            Err(e) => {
                warn!(error = %e, "automation service failed to start");
                self.mark_stopped(Some(false));
                if let Err(cleanup) = self.credential_file.remove() {
                    debug!(error = %cleanup, "could not remove credential file after failed start");
                }
                Err(e)
            },
        }
    }

    /// Returns `None` when the config is disabled.
    async fn open(&self) -> Result<Option<(Running, AutomationCredentials)>> {
        let config = load_or_init(&self.paths)?;
        if !config.enabled {
            self.credential_file.remove()?;
            info!("automation disabled; listener not started");
            return Ok(None);
        }

        let listener = TcpListener::bind((LOOPBACK_HOST, 0)).await?;
        let addr: SocketAddr = listener.local_addr()?;
        let credentials = AutomationCredentials::generate(addr.port());
        self.credential_file.write(&credentials)?;

        let endpoint = Arc::new(Endpoint::new(
            credentials.token.clone(),
            config,
            Arc::clone(&self.bootstrap),
        ));
        let app = build_app(Arc::clone(&endpoint));
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone().cancelled_owned();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "automation listener exited with error");
            }
        });

        info!(%addr, "automation service listening");
        Ok(Some((
            Running {
                endpoint,
                cancel,
                server,
            },
            credentials,
        )))
    }

    async fn stop_locked(&self, running: &mut Option<Running>) -> Result<()> {
        let Some(run) = running.take() else {
            self.mark_stopped(None);
            self.credential_file.remove()?;
            return Ok(());
        };

        self.write_snapshot().state = LifecycleState::Stopping;
        let failed = run.endpoint.begin_shutdown();
        run.cancel.cancel();
        let removed = self.credential_file.remove();
        self.write_snapshot().credentials = None;

        let mut server = run.server;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server)
            .await
            .is_err()
        {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "automation listener did not drain in time; aborting"
            );
            server.abort();
        }

        self.mark_stopped(None);
        info!(failed_pending = failed, "automation service stopped");
        removed?;
        Ok(())
    }

    /// Back to `Stopped` with no credentials; `config_enabled` is updated
    /// only when given.
    fn mark_stopped(&self, config_enabled: Option<bool>) {
        let mut snapshot = self.write_snapshot();
        snapshot.state = LifecycleState::Stopped;
        snapshot.credentials = None;
        if let Some(enabled) = config_enabled {
            snapshot.config_enabled = enabled;
        }
    }

    fn read_snapshot(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_snapshot(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AutomationService {
    fn drop(&mut self) {
        if let Some(run) = self.running.get_mut().take() {
            run.endpoint.begin_shutdown();
            run.cancel.cancel();
            run.server.abort();
            if let Err(e) = self.credential_file.remove() {
                debug!(error = %e, "could not remove credential file on drop");
            }
        }
    }
}
