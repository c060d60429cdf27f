//! Server registry: the authoritative in-memory view of the managed fleet
//!
//! All mutations pass through one tokio mutex, so the registry behaves as a
//! single logical writer: no two operations can observe-then-write a stale
//! row, and reads are always consistent snapshots. Every successful
//! mutation persists to the store before the change event is emitted.

use crate::config::PortConfig;
use crate::error::{ControlError, Result};
use crate::events::{ChangeKind, EventBus};
use crate::store::ServerStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operator intent for a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Absent,
    Created,
    Running,
    Stopped,
}

/// Last-known actual state, driven by the lifecycle controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    Unknown,
    Creating,
    Running,
    Stopping,
    Stopped,
    Removing,
    Removed,
    Errored,
}

impl ObservedState {
    /// States in which the server holds a container reference
    pub fn has_container(self) -> bool {
        matches!(
            self,
            ObservedState::Creating
                | ObservedState::Running
                | ObservedState::Stopping
                | ObservedState::Stopped
                | ObservedState::Removing
                | ObservedState::Errored
        )
    }
}

impl std::fmt::Display for ObservedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObservedState::Unknown => "unknown",
            ObservedState::Creating => "creating",
            ObservedState::Running => "running",
            ObservedState::Stopping => "stopping",
            ObservedState::Stopped => "stopped",
            ObservedState::Removing => "removing",
            ObservedState::Removed => "removed",
            ObservedState::Errored => "errored",
        };
        write!(f, "{}", s)
    }
}

/// What a server is created from. Consumed uniformly by create; a catalog
/// reference resolves to an image tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerTemplate {
    /// Direct image reference
    Image {
        image: String,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Named template plus version, resolved as "<template>:<version>"
    Catalog {
        template: String,
        version: String,
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

impl ServerTemplate {
    /// The image reference this template resolves to
    pub fn image(&self) -> String {
        match self {
            ServerTemplate::Image { image, .. } => image.clone(),
            ServerTemplate::Catalog {
                template, version, ..
            } => format!("{}:{}", template, version),
        }
    }

    /// Environment passed to the container
    pub fn env(&self) -> &HashMap<String, String> {
        match self {
            ServerTemplate::Image { env, .. } => env,
            ServerTemplate::Catalog { env, .. } => env,
        }
    }
}

/// One managed game server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedServer {
    /// Stable identifier, never reused
    pub id: String,
    /// Human label, unique across the fleet
    pub name: String,
    pub template: ServerTemplate,
    /// Runtime-assigned container id, present only while a container exists
    pub container_id: Option<String>,
    pub desired_state: DesiredState,
    pub observed_state: ObservedState,
    pub host_port: u16,
    pub game_port: u16,
    /// Named volume holding the server's persistent data
    pub data_volume: String,
    pub auto_restart: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// How a state update treats the stored container reference
#[derive(Debug, Clone)]
pub enum ContainerUpdate {
    Keep,
    Set(String),
    Clear,
}

/// Input for creating a new managed server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerDraft {
    pub name: String,
    pub template: ServerTemplate,
    /// Requested host port; allocated from the range when unset
    pub host_port: Option<u16>,
    /// Requested game port; allocated from the range when unset
    pub game_port: Option<u16>,
    #[serde(default)]
    pub auto_restart: bool,
}

/// The single-writer registry backing the whole control plane
pub struct Registry {
    servers: Mutex<HashMap<String, ManagedServer>>,
    store: Arc<dyn ServerStore>,
    events: EventBus,
    ports: PortConfig,
}

impl Registry {
    pub fn new(store: Arc<dyn ServerStore>, events: EventBus, ports: PortConfig) -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            store,
            events,
            ports,
        }
    }

    /// Rehydrate the registry from the store at startup.
    ///
    /// Rows last seen Running or Creating are demoted to Unknown so the
    /// first reconciliation pass re-inspects them instead of trusting a
    /// pre-crash snapshot.
    pub async fn load(&self) -> Result<usize> {
        let rows = self
            .store
            .load()
            .map_err(|e| ControlError::Store(e.to_string()))?;
        let mut servers = self.servers.lock().await;
        for mut row in rows {
            if matches!(
                row.observed_state,
                ObservedState::Running | ObservedState::Creating
            ) {
                debug!(server = %row.name, "Demoting observed state to unknown after restart");
                row.observed_state = ObservedState::Unknown;
            }
            servers.insert(row.id.clone(), row);
        }
        info!(count = servers.len(), "Registry loaded from store");
        Ok(servers.len())
    }

    /// Create a new server row. Fails with `DuplicateName` when the name is
    /// held by a live row and `PortExhausted` when no free port pair exists
    /// (or a specifically requested port is already held). A row whose
    /// container vanished (observed Removed) no longer owns its name; it is
    /// evicted so the fresh create can reuse it.
    pub async fn create(&self, draft: ServerDraft) -> Result<ManagedServer> {
        let mut servers = self.servers.lock().await;

        if let Some(existing) = servers.values().find(|s| s.name == draft.name) {
            if existing.observed_state != ObservedState::Removed {
                return Err(ControlError::DuplicateName(draft.name));
            }
            let stale_id = existing.id.clone();
            debug!(server = %draft.name, id = %stale_id, "Evicting removed row for name reuse");
            self.store.delete(&stale_id)?;
            servers.remove(&stale_id);
            self.events.registry_changed(&stale_id, ChangeKind::Removed);
        }

        let (host_port, game_port) = allocate_ports(&servers, &self.ports, &draft)?;

        let id = Uuid::new_v4().to_string();
        let server = ManagedServer {
            id: id.clone(),
            name: draft.name.clone(),
            data_volume: format!("fleetgate-{}-data", draft.name),
            template: draft.template,
            container_id: None,
            desired_state: DesiredState::Created,
            observed_state: ObservedState::Unknown,
            host_port,
            game_port,
            auto_restart: draft.auto_restart,
            last_error: None,
            updated_at: Utc::now(),
        };

        self.store.save(&server)?;
        servers.insert(id.clone(), server.clone());
        // Publish while the writer lock is held so subscribers observe
        // events in commit order.
        self.events.registry_changed(&id, ChangeKind::Created);
        drop(servers);

        info!(
            server = %server.name,
            id = %server.id,
            host_port,
            game_port,
            "Registered new server"
        );
        Ok(server)
    }

    pub async fn get(&self, id: &str) -> Option<ManagedServer> {
        self.servers.lock().await.get(id).cloned()
    }

    /// Consistent snapshot of every row, ordered by name
    pub async fn list(&self) -> Vec<ManagedServer> {
        let servers = self.servers.lock().await;
        let mut rows: Vec<ManagedServer> = servers.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Update a server's observed state.
    ///
    /// `container` sets, keeps or clears the stored container reference;
    /// states that cannot hold a container always clear it. `error` sets
    /// `last_error` when given and clears it otherwise.
    pub async fn update_state(
        &self,
        id: &str,
        observed: ObservedState,
        container: ContainerUpdate,
        error: Option<String>,
    ) -> Result<ManagedServer> {
        let mut servers = self.servers.lock().await;
        let server = servers
            .get_mut(id)
            .ok_or_else(|| ControlError::UnknownServer(id.to_string()))?;

        match container {
            ContainerUpdate::Keep => {}
            ContainerUpdate::Set(cid) => server.container_id = Some(cid),
            ContainerUpdate::Clear => server.container_id = None,
        }
        if !observed.has_container() {
            server.container_id = None;
        }
        server.observed_state = observed;
        server.last_error = error;
        server.updated_at = Utc::now();

        let updated = server.clone();
        self.store.save(&updated)?;
        self.events.registry_changed(id, ChangeKind::StateChanged);
        drop(servers);

        debug!(server = %updated.name, state = %observed, "Observed state updated");
        Ok(updated)
    }

    /// Record new operator intent for a server
    pub async fn mark_desired(&self, id: &str, desired: DesiredState) -> Result<ManagedServer> {
        let mut servers = self.servers.lock().await;
        let server = servers
            .get_mut(id)
            .ok_or_else(|| ControlError::UnknownServer(id.to_string()))?;
        server.desired_state = desired;
        server.updated_at = Utc::now();

        let updated = server.clone();
        self.store.save(&updated)?;
        self.events.registry_changed(id, ChangeKind::StateChanged);
        drop(servers);

        Ok(updated)
    }

    /// Physically remove a row once its container is gone
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut servers = self.servers.lock().await;
        let server = servers
            .remove(id)
            .ok_or_else(|| ControlError::UnknownServer(id.to_string()))?;

        if let Err(e) = self.store.delete(id) {
            // Put the row back so registry and store do not diverge
            warn!(server = %server.name, error = %e, "Failed to delete server from store");
            servers.insert(id.to_string(), server);
            return Err(e);
        }
        self.events.registry_changed(id, ChangeKind::Removed);
        drop(servers);

        info!(id, "Server removed from registry");
        Ok(())
    }
}

/// Pick the lowest free port in each configured range, or honour explicitly
/// requested ports when they are free. Deterministic given the same set of
/// non-removed rows.
fn allocate_ports(
    servers: &HashMap<String, ManagedServer>,
    ports: &PortConfig,
    draft: &ServerDraft,
) -> Result<(u16, u16)> {
    let held_host: Vec<u16> = servers
        .values()
        .filter(|s| s.observed_state != ObservedState::Removed)
        .map(|s| s.host_port)
        .collect();
    let held_game: Vec<u16> = servers
        .values()
        .filter(|s| s.observed_state != ObservedState::Removed)
        .map(|s| s.game_port)
        .collect();

    let host_port = pick_port(draft.host_port, ports.host_range, &held_host)?;
    let game_port = pick_port(draft.game_port, ports.game_range, &held_game)?;
    Ok((host_port, game_port))
}

fn pick_port(requested: Option<u16>, range: (u16, u16), held: &[u16]) -> Result<u16> {
    if let Some(port) = requested {
        if held.contains(&port) {
            return Err(ControlError::PortExhausted);
        }
        return Ok(port);
    }
    (range.0..range.1)
        .find(|p| !held.contains(p))
        .ok_or(ControlError::PortExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::store::SqliteStore;

    /// Store wrapper that records the commit order of mutations
    struct RecordingStore {
        inner: SqliteStore,
        log: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                log: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl ServerStore for RecordingStore {
        fn load(&self) -> Result<Vec<ManagedServer>> {
            self.inner.load()
        }

        fn save(&self, server: &ManagedServer) -> Result<()> {
            self.inner.save(server)?;
            self.log.lock().unwrap().push(server.id.clone());
            Ok(())
        }

        fn delete(&self, id: &str) -> Result<()> {
            self.inner.delete(id)?;
            self.log.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn test_registry() -> Registry {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        Registry::new(
            store,
            EventBus::new(),
            PortConfig {
                host_range: (25565, 25570),
                game_range: (8100, 8105),
            },
        )
    }

    fn draft(name: &str) -> ServerDraft {
        ServerDraft {
            name: name.to_string(),
            template: ServerTemplate::Image {
                image: "game:latest".to_string(),
                env: HashMap::new(),
            },
            host_port: None,
            game_port: None,
            auto_restart: false,
        }
    }

    #[tokio::test]
    async fn test_create_allocates_lowest_free_ports() {
        let registry = test_registry();
        let a = registry.create(draft("alpha")).await.unwrap();
        let b = registry.create(draft("beta")).await.unwrap();
        assert_eq!(a.host_port, 25565);
        assert_eq!(a.game_port, 8100);
        assert_eq!(b.host_port, 25566);
        assert_eq!(b.game_port, 8101);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = test_registry();
        registry.create(draft("alpha")).await.unwrap();
        let err = registry.create(draft("alpha")).await.unwrap_err();
        assert!(matches!(err, ControlError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn test_requested_port_conflict_rejected() {
        let registry = test_registry();
        let mut d = draft("alpha");
        d.host_port = Some(25565);
        registry.create(d).await.unwrap();

        let mut d2 = draft("beta");
        d2.host_port = Some(25565);
        let err = registry.create(d2).await.unwrap_err();
        assert!(matches!(err, ControlError::PortExhausted));
    }

    #[tokio::test]
    async fn test_port_exhaustion() {
        let registry = test_registry();
        for i in 0..5 {
            registry.create(draft(&format!("srv-{}", i))).await.unwrap();
        }
        let err = registry.create(draft("one-too-many")).await.unwrap_err();
        assert!(matches!(err, ControlError::PortExhausted));
    }

    #[tokio::test]
    async fn test_no_duplicate_ports_under_concurrent_creation() {
        let registry = Arc::new(test_registry());
        let mut handles = Vec::new();
        for i in 0..5 {
            let reg = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                reg.create(draft(&format!("srv-{}", i))).await
            }));
        }
        let mut host_ports = Vec::new();
        for handle in handles {
            let server = handle.await.unwrap().unwrap();
            host_ports.push(server.host_port);
        }
        host_ports.sort_unstable();
        host_ports.dedup();
        assert_eq!(host_ports.len(), 5, "each creation got a distinct port");
    }

    #[tokio::test]
    async fn test_events_publish_in_commit_order() {
        let store = Arc::new(RecordingStore::new());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let registry = Arc::new(Registry::new(
            Arc::clone(&store) as Arc<dyn ServerStore>,
            events,
            PortConfig::default(),
        ));

        let mut handles = Vec::new();
        for i in 0..8 {
            let reg = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let server = reg.create(draft(&format!("srv-{}", i))).await.unwrap();
                reg.update_state(
                    &server.id,
                    ObservedState::Running,
                    ContainerUpdate::Set(format!("c{}", i)),
                    None,
                )
                .await
                .unwrap();
                reg.mark_desired(&server.id, DesiredState::Stopped).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // The event stream must replay the mutations in the exact order
        // they were committed to the store.
        let committed = store.log.lock().unwrap().clone();
        let mut published = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Registry(ev) = event {
                published.push(ev.server_id);
            }
        }
        assert_eq!(published, committed);
    }

    #[tokio::test]
    async fn test_removed_row_does_not_block_name_reuse() {
        let registry = test_registry();
        let old = registry.create(draft("alpha")).await.unwrap();
        registry
            .update_state(&old.id, ObservedState::Removed, ContainerUpdate::Keep, None)
            .await
            .unwrap();

        // The vanished row no longer owns the name; a fresh create evicts it
        let new = registry.create(draft("alpha")).await.unwrap();
        assert_ne!(new.id, old.id);
        assert!(registry.get(&old.id).await.is_none());
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_state_clears_container_when_removed() {
        let registry = test_registry();
        let server = registry.create(draft("alpha")).await.unwrap();
        registry
            .update_state(
                &server.id,
                ObservedState::Running,
                ContainerUpdate::Set("c1".into()),
                None,
            )
            .await
            .unwrap();
        let updated = registry
            .update_state(&server.id, ObservedState::Removed, ContainerUpdate::Keep, None)
            .await
            .unwrap();
        assert_eq!(updated.container_id, None);
    }

    #[tokio::test]
    async fn test_load_demotes_running_to_unknown() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let registry = Registry::new(
            Arc::clone(&store) as Arc<dyn ServerStore>,
            EventBus::new(),
            PortConfig::default(),
        );
        let server = registry.create(draft("alpha")).await.unwrap();
        registry
            .update_state(
                &server.id,
                ObservedState::Running,
                ContainerUpdate::Set("c1".into()),
                None,
            )
            .await
            .unwrap();

        // Fresh registry over the same store, as after a restart
        let reloaded = Registry::new(store, EventBus::new(), PortConfig::default());
        reloaded.load().await.unwrap();
        let row = reloaded.get(&server.id).await.unwrap();
        assert_eq!(row.observed_state, ObservedState::Unknown);
    }

    #[test]
    fn test_template_image_resolution() {
        let t = ServerTemplate::Catalog {
            template: "minecraft-paper".to_string(),
            version: "1.21".to_string(),
            env: HashMap::new(),
        };
        assert_eq!(t.image(), "minecraft-paper:1.21");
    }
}
