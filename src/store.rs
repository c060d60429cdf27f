//! SQLite-backed persistence for managed server rows
//!
//! Durability is this layer's job; ordering and logical atomicity of
//! mutations belong to the registry, which is the only caller.

use crate::error::{ControlError, Result};
use crate::registry::{DesiredState, ManagedServer, ObservedState, ServerTemplate};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Current schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Repository boundary used by the registry
pub trait ServerStore: Send + Sync {
    fn load(&self) -> Result<Vec<ManagedServer>>;
    fn save(&self, server: &ManagedServer) -> Result<()>;
    fn delete(&self, id: &str) -> Result<()>;
}

/// SQLite store with thread-safe access
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ControlError::Store(e.to_string()))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;

        info!("Server store opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            debug!("Applying migration v1: servers table");
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS servers (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    template TEXT NOT NULL,
                    container_id TEXT,
                    desired_state TEXT NOT NULL,
                    observed_state TEXT NOT NULL,
                    host_port INTEGER NOT NULL,
                    game_port INTEGER NOT NULL,
                    data_volume TEXT NOT NULL,
                    auto_restart INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    updated_at TEXT NOT NULL
                );
                "#,
            )?;
            conn.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }
}

impl ServerStore for SqliteStore {
    fn load(&self) -> Result<Vec<ManagedServer>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, template, container_id, desired_state, observed_state,
                    host_port, game_port, data_volume, auto_restart, last_error, updated_at
             FROM servers ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            let template_json: String = row.get(2)?;
            let desired: String = row.get(4)?;
            let observed: String = row.get(5)?;
            let updated_at: String = row.get(11)?;
            Ok(RawRow {
                id: row.get(0)?,
                name: row.get(1)?,
                template_json,
                container_id: row.get(3)?,
                desired,
                observed,
                host_port: row.get::<_, i64>(6)? as u16,
                game_port: row.get::<_, i64>(7)? as u16,
                data_volume: row.get(8)?,
                auto_restart: row.get::<_, i64>(9)? != 0,
                last_error: row.get(10)?,
                updated_at,
            })
        })?;

        let mut servers = Vec::new();
        for row in rows {
            servers.push(row?.into_server()?);
        }
        Ok(servers)
    }

    fn save(&self, server: &ManagedServer) -> Result<()> {
        let template = serde_json::to_string(&server.template)
            .map_err(|e| ControlError::Store(e.to_string()))?;
        let desired = serde_json::to_string(&server.desired_state)
            .map_err(|e| ControlError::Store(e.to_string()))?;
        let observed = serde_json::to_string(&server.observed_state)
            .map_err(|e| ControlError::Store(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO servers
                (id, name, template, container_id, desired_state, observed_state,
                 host_port, game_port, data_volume, auto_restart, last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                template = excluded.template,
                container_id = excluded.container_id,
                desired_state = excluded.desired_state,
                observed_state = excluded.observed_state,
                host_port = excluded.host_port,
                game_port = excluded.game_port,
                data_volume = excluded.data_volume,
                auto_restart = excluded.auto_restart,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
            params![
                server.id,
                server.name,
                template,
                server.container_id,
                desired,
                observed,
                server.host_port as i64,
                server.game_port as i64,
                server.data_volume,
                server.auto_restart as i64,
                server.last_error,
                server.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM servers WHERE id = ?1", params![id])?;
        Ok(())
    }
}

struct RawRow {
    id: String,
    name: String,
    template_json: String,
    container_id: Option<String>,
    desired: String,
    observed: String,
    host_port: u16,
    game_port: u16,
    data_volume: String,
    auto_restart: bool,
    last_error: Option<String>,
    updated_at: String,
}

impl RawRow {
    fn into_server(self) -> Result<ManagedServer> {
        let template: ServerTemplate = serde_json::from_str(&self.template_json)
            .map_err(|e| ControlError::Store(format!("corrupt template column: {}", e)))?;
        let desired_state: DesiredState = serde_json::from_str(&self.desired)
            .map_err(|e| ControlError::Store(format!("corrupt desired_state column: {}", e)))?;
        let observed_state: ObservedState = serde_json::from_str(&self.observed)
            .map_err(|e| ControlError::Store(format!("corrupt observed_state column: {}", e)))?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| ControlError::Store(format!("corrupt updated_at column: {}", e)))?
            .with_timezone(&Utc);

        Ok(ManagedServer {
            id: self.id,
            name: self.name,
            template,
            container_id: self.container_id,
            desired_state,
            observed_state,
            host_port: self.host_port,
            game_port: self.game_port,
            data_volume: self.data_volume,
            auto_restart: self.auto_restart,
            last_error: self.last_error,
            updated_at,
        })
    }
}
