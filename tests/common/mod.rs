//! Shared test fixtures: a scriptable in-memory container runtime and a
//! fully wired controller over an in-memory store.
#![allow(dead_code)]

use async_trait::async_trait;
use fleetgate::config::{DockerConfig, PortConfig, ReconcileConfig};
use fleetgate::error::{ControlError, Result};
use fleetgate::events::EventBus;
use fleetgate::lifecycle::LifecycleController;
use fleetgate::registry::{Registry, ServerDraft, ServerTemplate};
use fleetgate::runtime::{ContainerRuntime, CreateSpec, RuntimeStatus};
use fleetgate::store::SqliteStore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ContainerState {
    name: String,
    running: bool,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, ContainerState>,
    volumes: HashSet<String>,
    next_id: u64,
    fail_create: VecDeque<ControlError>,
    fail_start: VecDeque<ControlError>,
    fail_stop: VecDeque<ControlError>,
    create_calls: u32,
    start_calls: u32,
    successful_starts: u32,
    start_delay: Option<Duration>,
}

/// In-memory container runtime with scriptable failures and call recording
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next create call
    pub fn fail_next_create(&self, err: ControlError) {
        self.inner.lock().unwrap().fail_create.push_back(err);
    }

    /// Queue an error for the next start call
    pub fn fail_next_start(&self, err: ControlError) {
        self.inner.lock().unwrap().fail_start.push_back(err);
    }

    /// Queue an error for the next stop call
    pub fn fail_next_stop(&self, err: ControlError) {
        self.inner.lock().unwrap().fail_stop.push_back(err);
    }

    /// Make every start call take this long, to hold operations in flight
    pub fn set_start_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().start_delay = Some(delay);
    }

    /// Mark a container as exited, as if the process crashed
    pub fn set_exited(&self, container_id: &str) {
        if let Some(c) = self.inner.lock().unwrap().containers.get_mut(container_id) {
            c.running = false;
        }
    }

    /// Remove a container out-of-band, as if deleted behind our back
    pub fn drop_container(&self, container_id: &str) {
        self.inner.lock().unwrap().containers.remove(container_id);
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    pub fn is_running(&self, container_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .containers
            .get(container_id)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub fn has_volume(&self, volume: &str) -> bool {
        self.inner.lock().unwrap().volumes.contains(volume)
    }

    pub fn create_calls(&self) -> u32 {
        self.inner.lock().unwrap().create_calls
    }

    pub fn start_calls(&self) -> u32 {
        self.inner.lock().unwrap().start_calls
    }

    pub fn successful_starts(&self) -> u32 {
        self.inner.lock().unwrap().successful_starts
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &CreateSpec) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.create_calls += 1;
        if let Some(err) = inner.fail_create.pop_front() {
            return Err(err);
        }
        inner.next_id += 1;
        let id = format!("ctr-{}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            ContainerState {
                name: spec.name.clone(),
                running: false,
            },
        );
        inner.volumes.insert(spec.volume.clone());
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        let delay = self.inner.lock().unwrap().start_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.start_calls += 1;
        if let Some(err) = inner.fail_start.pop_front() {
            return Err(err);
        }
        match inner.containers.get_mut(container_id) {
            Some(c) => {
                c.running = true;
                inner.successful_starts += 1;
                Ok(())
            }
            None => Err(ControlError::RuntimeNotFound(container_id.to_string())),
        }
    }

    async fn stop(&self, container_id: &str, _grace: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.fail_stop.pop_front() {
            return Err(err);
        }
        match inner.containers.get_mut(container_id) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(ControlError::RuntimeNotFound(container_id.to_string())),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.inner.lock().unwrap().containers.remove(container_id);
        Ok(())
    }

    async fn remove_volume(&self, volume: &str) -> Result<()> {
        self.inner.lock().unwrap().volumes.remove(volume);
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<RuntimeStatus> {
        let inner = self.inner.lock().unwrap();
        Ok(match inner.containers.get(container_id) {
            Some(c) if c.running => RuntimeStatus::Running,
            Some(_) => RuntimeStatus::Exited,
            None => RuntimeStatus::Missing,
        })
    }
}

/// Everything a lifecycle test needs, wired over in-memory fakes
pub struct Harness {
    pub registry: Arc<Registry>,
    pub controller: Arc<LifecycleController>,
    pub runtime: Arc<FakeRuntime>,
    pub events: EventBus,
}

pub fn harness() -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let events = EventBus::new();
    let registry = Arc::new(Registry::new(
        store,
        events.clone(),
        PortConfig {
            host_range: (25565, 25575),
            game_range: (8100, 8110),
        },
    ));
    let runtime = Arc::new(FakeRuntime::new());
    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&registry),
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        events.clone(),
        DockerConfig {
            host: None,
            stop_grace_secs: 1,
            operation_timeout_secs: 5,
        },
        ReconcileConfig {
            interval_secs: 10,
            retry_attempts: 4,
            retry_backoff_ms: 1,
        },
    ));
    Harness {
        registry,
        controller,
        runtime,
        events,
    }
}

pub fn draft(name: &str) -> ServerDraft {
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
