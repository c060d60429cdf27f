//! Lifecycle controller: per-server state machine over the runtime boundary
//!
//! Each server id is guarded by its own exclusivity token, so operations
//! for different servers run in parallel while a second request for the
//! same server fails with `OperationInProgress`. The periodic
//! reconciliation pass acquires the same tokens and therefore never
//! overlaps a live operation. Runtime calls run off the request path with
//! a bounded timeout; only `RuntimeUnavailable` failures are retried.

use crate::config::{DockerConfig, ReconcileConfig};
use crate::error::{ControlError, Result};
use crate::events::EventBus;
use crate::registry::{
    ContainerUpdate, DesiredState, ManagedServer, ObservedState, Registry, ServerDraft,
};
use crate::runtime::{ContainerRuntime, CreateSpec, RuntimeStatus};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Exponential backoff for auto-restart: base 1s, capped at 60s
const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(60);

struct RestartBackoff {
    attempts: u32,
    next_try: Instant,
}

/// Drives every managed server's observed state toward its desired state
pub struct LifecycleController {
    registry: Arc<Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    events: EventBus,
    docker: DockerConfig,
    retry: ReconcileConfig,
    /// Per-server exclusivity tokens
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Auto-restart backoff bookkeeping, reset on successful start
    restart_backoff: DashMap<String, RestartBackoff>,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<Registry>,
        runtime: Arc<dyn ContainerRuntime>,
        events: EventBus,
        docker: DockerConfig,
        retry: ReconcileConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            events,
            docker,
            retry,
            locks: DashMap::new(),
            restart_backoff: DashMap::new(),
        }
    }

    /// Acquire the exclusivity token for a server id without waiting.
    /// A held token means another operation is in flight.
    fn acquire(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned()
            .map_err(|_| ControlError::OperationInProgress(id.to_string()))
    }

    /// Record an observed-state transition and publish it on the bus
    async fn transition(
        &self,
        id: &str,
        to: ObservedState,
        container: ContainerUpdate,
        error: Option<String>,
    ) -> Result<ManagedServer> {
        let from = self
            .registry
            .get(id)
            .await
            .map(|s| s.observed_state)
            .unwrap_or(ObservedState::Unknown);
        let updated = self.registry.update_state(id, to, container, error).await?;
        self.events.lifecycle_transition(id, from, to);
        Ok(updated)
    }

    /// Run one runtime call with the configured overall timeout; expiry
    /// takes the same error path as an unreachable endpoint.
    async fn timed<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.docker.operation_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::RuntimeUnavailable(
                "runtime call timed out".to_string(),
            )),
        }
    }

    /// Retry a runtime call while it fails as retryable, with exponential
    /// backoff. Non-retryable errors are returned immediately.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.retry.retry_backoff();
        let attempts = self.retry.retry_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.timed(call()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(attempt, error = %e, "Retryable runtime failure, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        // Unreachable: the loop always returns, but keep the compiler honest
        Err(last_err.unwrap_or(ControlError::RuntimeUnavailable("retries exhausted".into())))
    }

    // ==================== Operator requests ====================

    /// Create a new server: register it, create and start its container.
    ///
    /// Registration errors (duplicate name, port exhaustion) surface
    /// immediately; the runtime work runs on the returned task while the
    /// exclusivity token is held.
    pub async fn request_create(
        self: &Arc<Self>,
        draft: ServerDraft,
    ) -> Result<(ManagedServer, JoinHandle<()>)> {
        let server = self.registry.create(draft).await?;
        let guard = self.acquire(&server.id)?;
        let server = self
            .registry
            .mark_desired(&server.id, DesiredState::Running)
            .await?;

        let controller = Arc::clone(self);
        let task_server = server.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            controller.run_create(task_server).await;
        });
        Ok((server, handle))
    }

    async fn run_create(&self, server: ManagedServer) {
        let id = server.id.clone();
        if let Err(e) = self
            .transition(&id, ObservedState::Creating, ContainerUpdate::Keep, None)
            .await
        {
            error!(server = %server.name, error = %e, "Failed to record creating state");
            return;
        }

        let spec = CreateSpec {
            name: server.name.clone(),
            image: server.template.image(),
            env: server.template.env().clone(),
            host_port: server.host_port,
            game_port: server.game_port,
            volume: server.data_volume.clone(),
        };

        let container_id = match self.with_retry(|| self.runtime.create(&spec)).await {
            Ok(cid) => cid,
            Err(e) => {
                warn!(server = %server.name, error = %e, "Container creation failed");
                self.settle_errored(&id, ContainerUpdate::Clear, e.to_string()).await;
                return;
            }
        };

        if let Err(e) = self
            .transition(
                &id,
                ObservedState::Creating,
                ContainerUpdate::Set(container_id.clone()),
                None,
            )
            .await
        {
            error!(server = %server.name, error = %e, "Failed to record container reference");
            return;
        }

        match self.with_retry(|| self.runtime.start(&container_id)).await {
            Ok(()) => {
                info!(server = %server.name, container_id, "Server created and running");
                self.settle_running(&id).await;
            }
            Err(e) => {
                warn!(server = %server.name, error = %e, "Start after create failed, tearing down");
                // Best-effort teardown of the partially created container
                if let Err(rm) = self.runtime.remove(&container_id).await {
                    warn!(server = %server.name, error = %rm, "Teardown of partial container failed");
                }
                self.settle_errored(&id, ContainerUpdate::Clear, e.to_string()).await;
            }
        }
    }

    /// Start a stopped (or errored) server's existing container
    pub async fn request_start(self: &Arc<Self>, id: &str) -> Result<JoinHandle<()>> {
        let server = self.require(id).await?;
        match server.observed_state {
            ObservedState::Stopped | ObservedState::Errored | ObservedState::Unknown => {}
            state => {
                return Err(ControlError::InvalidTransition {
                    id: id.to_string(),
                    reason: format!("cannot start from state {}", state),
                })
            }
        }
        let container_id = server.container_id.clone().ok_or_else(|| {
            ControlError::InvalidTransition {
                id: id.to_string(),
                reason: "server has no container; create it first".to_string(),
            }
        })?;

        let guard = self.acquire(id)?;
        self.registry.mark_desired(id, DesiredState::Running).await?;

        let controller = Arc::clone(self);
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            let _guard = guard;
            controller.run_start(&id, &container_id).await;
        }))
    }

    async fn run_start(&self, id: &str, container_id: &str) {
        match self.with_retry(|| self.runtime.start(container_id)).await {
            Ok(()) => {
                info!(id, container_id, "Server started");
                self.settle_running(id).await;
            }
            Err(ControlError::RuntimeNotFound(msg)) => {
                // Container vanished out-of-band; a fresh create is required
                warn!(id, container_id, error = %msg, "Container gone, marking removed");
                if let Err(e) = self
                    .transition(id, ObservedState::Removed, ContainerUpdate::Clear, None)
                    .await
                {
                    error!(id, error = %e, "Failed to record removed state");
                }
                self.forget(id);
            }
            Err(e) => {
                warn!(id, error = %e, "Start failed");
                self.settle_errored(id, ContainerUpdate::Keep, e.to_string()).await;
            }
        }
    }

    /// Stop a running server with the configured grace period
    pub async fn request_stop(self: &Arc<Self>, id: &str) -> Result<JoinHandle<()>> {
        let server = self.require(id).await?;
        if server.observed_state != ObservedState::Running {
            return Err(ControlError::InvalidTransition {
                id: id.to_string(),
                reason: format!("cannot stop from state {}", server.observed_state),
            });
        }
        let container_id = server.container_id.clone().ok_or_else(|| {
            ControlError::InvalidTransition {
                id: id.to_string(),
                reason: "running server without container reference".to_string(),
            }
        })?;

        let guard = self.acquire(id)?;
        self.registry.mark_desired(id, DesiredState::Stopped).await?;

        let controller = Arc::clone(self);
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            let _guard = guard;
            controller.run_stop(&id, &container_id).await;
        }))
    }

    async fn run_stop(&self, id: &str, container_id: &str) {
        if let Err(e) = self
            .transition(id, ObservedState::Stopping, ContainerUpdate::Keep, None)
            .await
        {
            error!(id, error = %e, "Failed to record stopping state");
            return;
        }

        let grace = self.docker.stop_grace();
        match self
            .with_retry(|| self.runtime.stop(container_id, grace))
            .await
        {
            Ok(()) => {
                info!(id, container_id, "Server stopped");
                if let Err(e) = self
                    .transition(id, ObservedState::Stopped, ContainerUpdate::Keep, None)
                    .await
                {
                    error!(id, error = %e, "Failed to record stopped state");
                }
            }
            Err(ControlError::RuntimeNotFound(msg)) => {
                // Nothing left to stop; record the disappearance directly
                warn!(id, container_id, error = %msg, "Container gone, marking removed");
                if let Err(e) = self
                    .transition(id, ObservedState::Removed, ContainerUpdate::Clear, None)
                    .await
                {
                    error!(id, error = %e, "Failed to record removed state");
                }
                self.forget(id);
            }
            Err(e) => {
                warn!(id, error = %e, "Stop failed");
                self.settle_errored(id, ContainerUpdate::Keep, e.to_string()).await;
            }
        }
    }

    /// Restart: stop if running, then start, under one exclusivity span
    pub async fn request_restart(self: &Arc<Self>, id: &str) -> Result<JoinHandle<()>> {
        let server = self.require(id).await?;
        let container_id = server.container_id.clone().ok_or_else(|| {
            ControlError::InvalidTransition {
                id: id.to_string(),
                reason: "server has no container; create it first".to_string(),
            }
        })?;

        let guard = self.acquire(id)?;
        self.registry.mark_desired(id, DesiredState::Running).await?;

        let was_running = server.observed_state == ObservedState::Running;
        let controller = Arc::clone(self);
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            let _guard = guard;
            if was_running {
                controller.run_stop(&id, &container_id).await;
            }
            controller.run_start(&id, &container_id).await;
        }))
    }

    /// Delete a server: stop and remove its container, optionally purge
    /// the data volume, then drop the registry row.
    pub async fn request_delete(
        self: &Arc<Self>,
        id: &str,
        purge_volume: bool,
    ) -> Result<JoinHandle<()>> {
        let server = self.require(id).await?;
        let guard = self.acquire(id)?;
        self.registry.mark_desired(id, DesiredState::Absent).await?;

        let controller = Arc::clone(self);
        let id = id.to_string();
        Ok(tokio::spawn(async move {
            let _guard = guard;
            controller.run_delete(&id, server, purge_volume).await;
        }))
    }

    async fn run_delete(&self, id: &str, server: ManagedServer, purge_volume: bool) {
        if let Err(e) = self
            .transition(id, ObservedState::Removing, ContainerUpdate::Keep, None)
            .await
        {
            error!(id, error = %e, "Failed to record removing state");
            return;
        }

        if let Some(container_id) = &server.container_id {
            if server.observed_state == ObservedState::Running {
                if let Err(e) = self
                    .timed(self.runtime.stop(container_id, self.docker.stop_grace()))
                    .await
                {
                    warn!(id, error = %e, "Stop during delete failed, removing anyway");
                }
            }
            match self.with_retry(|| self.runtime.remove(container_id)).await {
                Ok(()) | Err(ControlError::RuntimeNotFound(_)) => {}
                Err(e) => {
                    warn!(id, error = %e, "Container removal failed");
                    self.settle_errored(id, ContainerUpdate::Keep, e.to_string()).await;
                    return;
                }
            }
        }

        if purge_volume {
            if let Err(e) = self.runtime.remove_volume(&server.data_volume).await {
                warn!(id, volume = %server.data_volume, error = %e, "Volume purge failed");
            }
        } else {
            debug!(id, volume = %server.data_volume, "Volume retained");
        }

        self.events
            .lifecycle_transition(id, server.observed_state, ObservedState::Removed);
        if let Err(e) = self.registry.remove(id).await {
            error!(id, error = %e, "Failed to remove registry row");
            return;
        }
        self.forget(id);
        info!(server = %server.name, "Server deleted");
    }

    // ==================== Reconciliation ====================

    /// One reconciliation pass: re-inspect every server whose observed
    /// state may have drifted and converge it. Servers with an operation
    /// in flight are skipped; their operation will settle the state.
    pub async fn reconcile(self: &Arc<Self>) {
        let snapshot = self.registry.list().await;
        for stale in snapshot {
            if stale.container_id.is_none() {
                continue;
            }
            let Ok(guard) = self.acquire(&stale.id) else {
                debug!(server = %stale.name, "Operation in flight, skipping reconcile");
                continue;
            };
            // An operation may have settled the row between the snapshot
            // and the token acquisition; only the re-read state is current.
            let Some(server) = self.registry.get(&stale.id).await else {
                drop(guard);
                continue;
            };
            let Some(container_id) = server.container_id.clone() else {
                drop(guard);
                continue;
            };
            let interesting = matches!(
                server.observed_state,
                ObservedState::Unknown
                    | ObservedState::Running
                    | ObservedState::Stopped
                    | ObservedState::Errored
            );
            if interesting {
                self.reconcile_one(&server, &container_id).await;
            }
            drop(guard);
        }
    }

    async fn reconcile_one(&self, server: &ManagedServer, container_id: &str) {
        let status = match self.timed(self.runtime.inspect(container_id)).await {
            Ok(status) => status,
            Err(e) => {
                debug!(server = %server.name, error = %e, "Inspect failed, will retry next pass");
                return;
            }
        };

        match status {
            RuntimeStatus::Running => {
                if server.observed_state != ObservedState::Running {
                    if server.desired_state == DesiredState::Stopped {
                        // Running but meant to be stopped: converge downward
                        info!(server = %server.name, "Reconcile: stopping stray running container");
                        self.run_stop(&server.id, container_id).await;
                    } else {
                        info!(server = %server.name, "Reconcile: container is running");
                        self.settle_running(&server.id).await;
                    }
                }
            }
            RuntimeStatus::Exited => match server.desired_state {
                DesiredState::Running => {
                    if server.auto_restart {
                        self.try_auto_restart(server, container_id).await;
                    } else if server.observed_state != ObservedState::Errored {
                        warn!(server = %server.name, "Reconcile: container exited unexpectedly");
                        self.settle_errored(
                            &server.id,
                            ContainerUpdate::Keep,
                            "container exited unexpectedly".to_string(),
                        )
                        .await;
                    }
                }
                _ => {
                    if server.observed_state != ObservedState::Stopped {
                        debug!(server = %server.name, "Reconcile: container is stopped");
                        if let Err(e) = self
                            .transition(
                                &server.id,
                                ObservedState::Stopped,
                                ContainerUpdate::Keep,
                                None,
                            )
                            .await
                        {
                            error!(server = %server.name, error = %e, "Failed to record stopped state");
                        }
                    }
                }
            },
            RuntimeStatus::Missing => {
                warn!(server = %server.name, container_id, "Reconcile: container is gone");
                if let Err(e) = self
                    .transition(&server.id, ObservedState::Removed, ContainerUpdate::Clear, None)
                    .await
                {
                    error!(server = %server.name, error = %e, "Failed to record removed state");
                }
                self.forget(&server.id);
            }
        }
    }

    /// Auto-restart with exponential backoff; retries indefinitely until an
    /// operator sets the desired state away from Running.
    async fn try_auto_restart(&self, server: &ManagedServer, container_id: &str) {
        let now = Instant::now();
        let due = self
            .restart_backoff
            .get(&server.id)
            .map(|b| now >= b.next_try)
            .unwrap_or(true);
        if !due {
            return;
        }

        let attempts = self
            .restart_backoff
            .get(&server.id)
            .map(|b| b.attempts)
            .unwrap_or(0);
        info!(server = %server.name, attempt = attempts + 1, "Auto-restarting server");

        match self.timed(self.runtime.start(container_id)).await {
            Ok(()) => {
                info!(server = %server.name, "Auto-restart succeeded");
                self.settle_running(&server.id).await;
            }
            Err(e) => {
                let backoff = restart_delay(attempts);
                warn!(
                    server = %server.name,
                    error = %e,
                    retry_in_secs = backoff.as_secs(),
                    "Auto-restart failed"
                );
                self.restart_backoff.insert(
                    server.id.clone(),
                    RestartBackoff {
                        attempts: attempts.saturating_add(1),
                        next_try: now + backoff,
                    },
                );
                if server.observed_state != ObservedState::Errored {
                    self.settle_errored(&server.id, ContainerUpdate::Keep, e.to_string())
                        .await;
                }
            }
        }
    }

    /// Run reconciliation on a fixed interval until shutdown
    pub async fn run_reconcile_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "Reconciler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.reconcile().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Wait for in-flight operations to finish, up to `timeout` total
    pub async fn drain(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let locks: Vec<Arc<Mutex<()>>> = self.locks.iter().map(|e| e.value().clone()).collect();
        for lock in locks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Drain timeout reached with operations still in flight");
                return;
            }
            let _ = tokio::time::timeout(remaining, lock.lock()).await;
        }
        debug!("All lifecycle operations drained");
    }

    // ==================== Helpers ====================

    /// Drop per-server bookkeeping once the row no longer references a
    /// container. A later request for the same id recreates its entries.
    fn forget(&self, id: &str) {
        self.locks.remove(id);
        self.restart_backoff.remove(id);
    }

    async fn require(&self, id: &str) -> Result<ManagedServer> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| ControlError::UnknownServer(id.to_string()))
    }

    async fn settle_running(&self, id: &str) {
        self.restart_backoff.remove(id);
        if let Err(e) = self
            .transition(id, ObservedState::Running, ContainerUpdate::Keep, None)
            .await
        {
            error!(id, error = %e, "Failed to record running state");
        }
    }

    async fn settle_errored(&self, id: &str, container: ContainerUpdate, message: String) {
        if let Err(e) = self
            .transition(id, ObservedState::Errored, container, Some(message))
            .await
        {
            error!(id, error = %e, "Failed to record errored state");
        }
    }
}

fn restart_delay(attempts: u32) -> Duration {
    let exp = RESTART_BACKOFF_BASE.saturating_mul(1u32 << attempts.min(6));
    exp.min(RESTART_BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::registry::ServerTemplate;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[test]
    fn test_restart_delay_doubles_and_caps() {
        assert_eq!(restart_delay(0), Duration::from_secs(1));
        assert_eq!(restart_delay(1), Duration::from_secs(2));
        assert_eq!(restart_delay(5), Duration::from_secs(32));
        assert_eq!(restart_delay(6), Duration::from_secs(60));
        assert_eq!(restart_delay(40), Duration::from_secs(60));
    }

    /// Runtime whose containers have all vanished out-of-band
    struct GoneRuntime;

    #[async_trait]
    impl ContainerRuntime for GoneRuntime {
        async fn create(&self, _spec: &CreateSpec) -> Result<String> {
            Ok("ctr-1".to_string())
        }
        async fn start(&self, container_id: &str) -> Result<()> {
            Err(ControlError::RuntimeNotFound(container_id.to_string()))
        }
        async fn stop(&self, container_id: &str, _grace: Duration) -> Result<()> {
            Err(ControlError::RuntimeNotFound(container_id.to_string()))
        }
        async fn remove(&self, _container_id: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_volume(&self, _volume: &str) -> Result<()> {
            Ok(())
        }
        async fn inspect(&self, _container_id: &str) -> Result<RuntimeStatus> {
            Ok(RuntimeStatus::Missing)
        }
    }

    fn gone_controller() -> (Arc<Registry>, Arc<LifecycleController>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let events = EventBus::new();
        let registry = Arc::new(Registry::new(store, events.clone(), PortConfig::default()));
        let controller = Arc::new(LifecycleController::new(
            Arc::clone(&registry),
            Arc::new(GoneRuntime),
            events,
            DockerConfig::default(),
            ReconcileConfig {
                interval_secs: 10,
                retry_attempts: 1,
                retry_backoff_ms: 1,
            },
        ));
        (registry, controller)
    }

    async fn seeded_server(
        registry: &Registry,
        controller: &LifecycleController,
    ) -> ManagedServer {
        let server = registry
            .create(ServerDraft {
                name: "alpha".to_string(),
                template: ServerTemplate::Image {
                    image: "game:latest".to_string(),
                    env: HashMap::new(),
                },
                host_port: None,
                game_port: None,
                auto_restart: true,
            })
            .await
            .unwrap();
        registry.mark_desired(&server.id, DesiredState::Running).await.unwrap();
        let server = registry
            .update_state(
                &server.id,
                ObservedState::Running,
                ContainerUpdate::Set("ctr-1".to_string()),
                None,
            )
            .await
            .unwrap();
        // Populate both bookkeeping maps as live operation would have
        drop(controller.acquire(&server.id).unwrap());
        controller.restart_backoff.insert(
            server.id.clone(),
            RestartBackoff {
                attempts: 2,
                next_try: Instant::now(),
            },
        );
        server
    }

    #[tokio::test]
    async fn test_reconcile_missing_clears_per_server_bookkeeping() {
        let (registry, controller) = gone_controller();
        let server = seeded_server(&registry, &controller).await;

        controller.reconcile().await;

        let row = registry.get(&server.id).await.unwrap();
        assert_eq!(row.observed_state, ObservedState::Removed);
        assert!(!controller.locks.contains_key(&server.id));
        assert!(!controller.restart_backoff.contains_key(&server.id));
    }

    #[tokio::test]
    async fn test_start_on_gone_container_clears_per_server_bookkeeping() {
        let (registry, controller) = gone_controller();
        let server = seeded_server(&registry, &controller).await;
        registry
            .update_state(
                &server.id,
                ObservedState::Stopped,
                ContainerUpdate::Keep,
                None,
            )
            .await
            .unwrap();

        let task = controller.request_start(&server.id).await.unwrap();
        task.await.unwrap();

        let row = registry.get(&server.id).await.unwrap();
        assert_eq!(row.observed_state, ObservedState::Removed);
        assert!(!controller.locks.contains_key(&server.id));
        assert!(!controller.restart_backoff.contains_key(&server.id));
    }
}
