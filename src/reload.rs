//! Proxy reload coordinator
//!
//! Subscribes to registry change events, debounces bursts, synthesizes
//! the routing config and applies it to the proxy only when the bytes
//! actually changed. Apply failures are retried with backoff; on
//! exhaustion the previous config stays in effect and the failure is
//! recorded for the control API to surface.

use crate::config::ProxyConfig;
use crate::error::{ControlError, Result};
use crate::events::{Event, EventBus};
use crate::registry::Registry;
use crate::synth;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Proxy boundary: hand over a new config and make it live
#[async_trait]
pub trait ProxyBackend: Send + Sync {
    async fn apply_config(&self, config: &[u8]) -> Result<()>;
}

/// Writes the config file atomically and runs an optional reload command
#[derive(Debug)]
pub struct FileProxyBackend {
    config_path: PathBuf,
    reload_command: Option<Vec<String>>,
}

impl FileProxyBackend {
    pub fn new(config_path: impl AsRef<Path>, reload_command: Option<&str>) -> Result<Self> {
        let reload_command = match reload_command {
            Some(cmd) => Some(
                shell_words::split(cmd)
                    .map_err(|e| ControlError::ProxyApplyFailed(format!("bad reload command: {}", e)))?,
            ),
            None => None,
        };
        if let Some(argv) = &reload_command {
            if argv.is_empty() {
                return Err(ControlError::ProxyApplyFailed(
                    "reload command is empty".to_string(),
                ));
            }
        }
        Ok(Self {
            config_path: config_path.as_ref().to_path_buf(),
            reload_command,
        })
    }
}

#[async_trait]
impl ProxyBackend for FileProxyBackend {
    async fn apply_config(&self, config: &[u8]) -> Result<()> {
        // Write-then-rename so the proxy never reads a half-written file
        let tmp_path = self.config_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, config)
            .await
            .map_err(|e| ControlError::ProxyApplyFailed(format!("write failed: {}", e)))?;
        tokio::fs::rename(&tmp_path, &self.config_path)
            .await
            .map_err(|e| ControlError::ProxyApplyFailed(format!("rename failed: {}", e)))?;

        if let Some(argv) = &self.reload_command {
            let status = tokio::process::Command::new(&argv[0])
                .args(&argv[1..])
                .status()
                .await
                .map_err(|e| {
                    ControlError::ProxyApplyFailed(format!("reload command failed to run: {}", e))
                })?;
            if !status.success() {
                return Err(ControlError::ProxyApplyFailed(format!(
                    "reload command exited with {}",
                    status
                )));
            }
        }

        debug!(path = %self.config_path.display(), "Proxy config applied");
        Ok(())
    }
}

/// Last apply outcome, surfaced by the control API
#[derive(Debug, Clone, Serialize, Default)]
pub struct SyncStatus {
    pub last_applied_at: Option<DateTime<Utc>>,
    pub last_failure: Option<String>,
    pub route_count: usize,
}

struct CoordinatorState {
    last_applied: Option<Vec<u8>>,
    status: SyncStatus,
}

/// Keeps the proxy's routing table in step with the registry
pub struct ReloadCoordinator {
    registry: Arc<Registry>,
    proxy: Arc<dyn ProxyBackend>,
    config: ProxyConfig,
    state: Mutex<CoordinatorState>,
}

impl ReloadCoordinator {
    pub fn new(registry: Arc<Registry>, proxy: Arc<dyn ProxyBackend>, config: ProxyConfig) -> Self {
        Self {
            registry,
            proxy,
            config,
            state: Mutex::new(CoordinatorState {
                last_applied: None,
                status: SyncStatus::default(),
            }),
        }
    }

    /// Current sync status snapshot
    pub fn status(&self) -> SyncStatus {
        self.state.lock().status.clone()
    }

    /// Synthesize and apply when the output differs from the last
    /// successfully applied config. No-op events never trigger a reload.
    pub async fn sync(&self) -> Result<bool> {
        let snapshot = self.registry.list().await;
        let routes = synth::routes(&snapshot);
        let rendered = synth::render(&routes);

        let unchanged = self
            .state
            .lock()
            .last_applied
            .as_deref()
            .is_some_and(|last| last == rendered.as_slice());
        if unchanged {
            debug!("Synthesized config unchanged, skipping reload");
            return Ok(false);
        }

        self.apply(rendered, routes.len()).await?;
        Ok(true)
    }

    /// Re-synthesize and apply unconditionally, for recovering from
    /// out-of-band proxy config drift.
    pub async fn force_resync(&self) -> Result<()> {
        let snapshot = self.registry.list().await;
        let routes = synth::routes(&snapshot);
        let rendered = synth::render(&routes);
        info!(routes = routes.len(), "Forced proxy resync");
        self.apply(rendered, routes.len()).await
    }

    /// Apply with bounded retries and exponential backoff. On exhaustion
    /// the previously applied config remains in effect.
    async fn apply(&self, rendered: Vec<u8>, route_count: usize) -> Result<()> {
        let mut backoff = self.config.apply_backoff();
        let attempts = self.config.apply_attempts.max(1);
        let mut last_err: Option<ControlError> = None;

        for attempt in 1..=attempts {
            match self.proxy.apply_config(&rendered).await {
                Ok(()) => {
                    let mut state = self.state.lock();
                    state.last_applied = Some(rendered);
                    state.status = SyncStatus {
                        last_applied_at: Some(Utc::now()),
                        last_failure: None,
                        route_count,
                    };
                    info!(routes = route_count, "Proxy config reloaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Proxy apply attempt failed");
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| ControlError::ProxyApplyFailed("no attempts made".to_string()));
        error!(error = %err, "Proxy apply failed after all retries; previous config stays in effect");
        self.state.lock().status.last_failure = Some(err.to_string());
        Err(err)
    }

    /// Event loop: debounce registry change bursts, then sync. A lagged
    /// subscription is treated as "something changed".
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<Event>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(
            debounce_ms = self.config.debounce_ms,
            "Proxy reload coordinator started"
        );
        let mut dirty = false;

        loop {
            if dirty {
                // Coalesce the burst: keep absorbing events for one window
                let window = tokio::time::sleep(self.config.debounce());
                tokio::pin!(window);
                loop {
                    tokio::select! {
                        _ = &mut window => break,
                        event = events.recv() => match event {
                            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                // Flush pending changes before exiting
                                let _ = self.sync().await;
                                info!("Proxy reload coordinator shutting down");
                                return;
                            }
                        }
                    }
                }
                dirty = false;
                if let Err(e) = self.sync().await {
                    warn!(error = %e, "Proxy sync failed; will retry on next change");
                }
                continue;
            }

            tokio::select! {
                event = events.recv() => match event {
                    Ok(Event::Registry(_)) => dirty = true,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event stream lagged, forcing sync");
                        dirty = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event bus closed, coordinator exiting");
                        return;
                    }
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Proxy reload coordinator shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Spawn the coordinator's event loop
    pub fn spawn(
        self: &Arc<Self>,
        bus: &EventBus,
        shutdown_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let events = bus.subscribe();
        tokio::spawn(async move {
            coordinator.run(events, shutdown_rx).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_backend_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.toml");
        let backend = FileProxyBackend::new(&path, None).unwrap();

        backend.apply_config(b"# empty\n").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"# empty\n");

        // Second apply replaces the file
        backend.apply_config(b"# v2\n").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"# v2\n");
    }

    #[tokio::test]
    async fn test_file_backend_runs_reload_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.toml");
        let marker = dir.path().join("reloaded");
        let cmd = format!("touch {}", marker.display());
        let backend = FileProxyBackend::new(&path, Some(&cmd)).unwrap();

        backend.apply_config(b"# empty\n").await.unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_file_backend_reports_failed_reload_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.toml");
        let backend = FileProxyBackend::new(&path, Some("false")).unwrap();

        let err = backend.apply_config(b"# empty\n").await.unwrap_err();
        assert!(matches!(err, ControlError::ProxyApplyFailed(_)));
    }

    #[test]
    fn test_bad_reload_command_rejected() {
        let err = FileProxyBackend::new("/tmp/routes.toml", Some("unbalanced 'quote")).unwrap_err();
        assert!(matches!(err, ControlError::ProxyApplyFailed(_)));
    }
}
