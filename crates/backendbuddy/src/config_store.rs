// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single seam to the persisted project-configuration record.
//!
//! Spec §1 treats configuration persistence as an external collaborator:
//! the core only ever reads the current snapshot and, for the one admin
//! endpoint that mutates it (`PUT /api/config`), applies a partial patch.
//! Schema and migration are this collaborator's responsibility, not the
//! core's — grounded field-for-field on
//! `original_source/backend/database.py`'s `ProjectConfig` table.
//!
//! The default implementation below uses `sqlx` against sqlite, keeping the
//! same `reqwest`/`tokio`-flavored ambient stack as the rest of this crate
//! (no ORM abstraction beyond what the single table needs).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Read-only view of the current project configuration, as consumed by the
/// core (spec §3 "Configuration snapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub name: String,
    pub directory: Option<String>,
    pub command: Option<String>,
    pub frontend_directory: Option<String>,
    pub frontend_command: Option<String>,
    pub port: Option<u16>,
    pub lan_ip: Option<String>,
    pub lan_enabled: bool,
    pub ngrok_enabled: bool,
    pub cloudflare_enabled: bool,
    pub queue_enabled: bool,
    pub max_concurrent_users: i64,
    pub prioritize_localhost: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            name: "My Project".to_owned(),
            directory: None,
            command: None,
            frontend_directory: None,
            frontend_command: None,
            port: None,
            lan_ip: None,
            lan_enabled: false,
            ngrok_enabled: false,
            cloudflare_enabled: false,
            queue_enabled: true,
            max_concurrent_users: 1,
            prioritize_localhost: true,
        }
    }
}

/// Partial update for `PUT /api/config`. Every field absent (`None`) is left
/// unchanged; present fields overwrite unconditionally, including `Some("")`
/// clearing a string field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub name: Option<String>,
    pub directory: Option<String>,
    pub command: Option<String>,
    pub frontend_directory: Option<String>,
    pub frontend_command: Option<String>,
    pub port: Option<u16>,
    pub lan_ip: Option<String>,
    pub lan_enabled: Option<bool>,
    pub ngrok_enabled: Option<bool>,
    pub cloudflare_enabled: Option<bool>,
    pub queue_enabled: Option<bool>,
    pub max_concurrent_users: Option<i64>,
    pub prioritize_localhost: Option<bool>,
}

/// The core's only contract with persistence: read the current record, and
/// apply a partial patch for the one admin endpoint that mutates it.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn current(&self) -> Option<ConfigSnapshot>;
    async fn apply_patch(&self, patch: ConfigPatch) -> anyhow::Result<ConfigSnapshot>;
}

/// Sqlite-backed `ConfigStore`, modeled on the `project_config` table.
/// Always operates on row id 1: this system supervises a single project.
pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS project_config (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL DEFAULT 'My Project',
                directory TEXT,
                command TEXT,
                frontend_directory TEXT,
                frontend_command TEXT,
                port INTEGER,
                lan_ip TEXT,
                lan_enabled INTEGER NOT NULL DEFAULT 0,
                ngrok_enabled INTEGER NOT NULL DEFAULT 0,
                cloudflare_enabled INTEGER NOT NULL DEFAULT 0,
                queue_enabled INTEGER NOT NULL DEFAULT 1,
                max_concurrent_users INTEGER NOT NULL DEFAULT 1,
                prioritize_localhost INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> ConfigSnapshot {
        ConfigSnapshot {
            name: row.get("name"),
            directory: row.get("directory"),
            command: row.get("command"),
            frontend_directory: row.get("frontend_directory"),
            frontend_command: row.get("frontend_command"),
            port: row.try_get::<i64, _>("port").ok().map(|p| p as u16),
            lan_ip: row.get("lan_ip"),
            lan_enabled: row.get::<i64, _>("lan_enabled") != 0,
            ngrok_enabled: row.get::<i64, _>("ngrok_enabled") != 0,
            cloudflare_enabled: row.get::<i64, _>("cloudflare_enabled") != 0,
            queue_enabled: row.get::<i64, _>("queue_enabled") != 0,
            max_concurrent_users: row.get("max_concurrent_users"),
            prioritize_localhost: row.get::<i64, _>("prioritize_localhost") != 0,
        }
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn current(&self) -> Option<ConfigSnapshot> {
        let row = sqlx::query("SELECT * FROM project_config WHERE id = 1").fetch_optional(&self.pool).await.ok()??;
        Some(Self::row_to_snapshot(&row))
    }

    async fn apply_patch(&self, patch: ConfigPatch) -> anyhow::Result<ConfigSnapshot> {
        let existing = self.current().await.unwrap_or_default();

        let merged = ConfigSnapshot {
            name: patch.name.unwrap_or(existing.name),
            directory: patch.directory.or(existing.directory),
            command: patch.command.or(existing.command),
            frontend_directory: patch.frontend_directory.or(existing.frontend_directory),
            frontend_command: patch.frontend_command.or(existing.frontend_command),
            port: patch.port.or(existing.port),
            lan_ip: patch.lan_ip.or(existing.lan_ip),
            lan_enabled: patch.lan_enabled.unwrap_or(existing.lan_enabled),
            ngrok_enabled: patch.ngrok_enabled.unwrap_or(existing.ngrok_enabled),
            cloudflare_enabled: patch.cloudflare_enabled.unwrap_or(existing.cloudflare_enabled),
            queue_enabled: patch.queue_enabled.unwrap_or(existing.queue_enabled),
            max_concurrent_users: patch.max_concurrent_users.unwrap_or(existing.max_concurrent_users),
            prioritize_localhost: patch.prioritize_localhost.unwrap_or(existing.prioritize_localhost),
        };

        sqlx::query(
            "INSERT INTO project_config
                (id, name, directory, command, frontend_directory, frontend_command, port,
                 lan_ip, lan_enabled, ngrok_enabled, cloudflare_enabled, queue_enabled,
                 max_concurrent_users, prioritize_localhost, updated_at)
             VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                directory = excluded.directory,
                command = excluded.command,
                frontend_directory = excluded.frontend_directory,
                frontend_command = excluded.frontend_command,
                port = excluded.port,
                lan_ip = excluded.lan_ip,
                lan_enabled = excluded.lan_enabled,
                ngrok_enabled = excluded.ngrok_enabled,
                cloudflare_enabled = excluded.cloudflare_enabled,
                queue_enabled = excluded.queue_enabled,
                max_concurrent_users = excluded.max_concurrent_users,
                prioritize_localhost = excluded.prioritize_localhost,
                updated_at = datetime('now')",
        )
        .bind(&merged.name)
        .bind(&merged.directory)
        .bind(&merged.command)
        .bind(&merged.frontend_directory)
        .bind(&merged.frontend_command)
        .bind(merged.port.map(|p| p as i64))
        .bind(&merged.lan_ip)
        .bind(merged.lan_enabled as i64)
        .bind(merged.ngrok_enabled as i64)
        .bind(merged.cloudflare_enabled as i64)
        .bind(merged.queue_enabled as i64)
        .bind(merged.max_concurrent_users)
        .bind(merged.prioritize_localhost as i64)
        .execute(&self.pool)
        .await?;

        Ok(merged)
    }
}

/// In-memory `ConfigStore`, used by integration tests and anywhere a
/// full sqlite pool is unwanted ceremony. Starts with no row (`current()`
/// returns `None`) until the first `apply_patch`, matching the sqlite
/// implementation's behavior for a fresh database.
#[derive(Default)]
pub struct MemoryConfigStore {
    row: std::sync::Mutex<Option<ConfigSnapshot>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an initial snapshot, bypassing `apply_patch`'s
    /// merge semantics. Handy for tests that want a fully-configured target
    /// from the first request.
    pub fn seeded(snapshot: ConfigSnapshot) -> Self {
        Self { row: std::sync::Mutex::new(Some(snapshot)) }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn current(&self) -> Option<ConfigSnapshot> {
        let guard = match self.row.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        guard.clone()
    }

    async fn apply_patch(&self, patch: ConfigPatch) -> anyhow::Result<ConfigSnapshot> {
        let mut guard = match self.row.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let existing = guard.clone().unwrap_or_default();
        let merged = ConfigSnapshot {
            name: patch.name.unwrap_or(existing.name),
            directory: patch.directory.or(existing.directory),
            command: patch.command.or(existing.command),
            frontend_directory: patch.frontend_directory.or(existing.frontend_directory),
            frontend_command: patch.frontend_command.or(existing.frontend_command),
            port: patch.port.or(existing.port),
            lan_ip: patch.lan_ip.or(existing.lan_ip),
            lan_enabled: patch.lan_enabled.unwrap_or(existing.lan_enabled),
            ngrok_enabled: patch.ngrok_enabled.unwrap_or(existing.ngrok_enabled),
            cloudflare_enabled: patch.cloudflare_enabled.unwrap_or(existing.cloudflare_enabled),
            queue_enabled: patch.queue_enabled.unwrap_or(existing.queue_enabled),
            max_concurrent_users: patch.max_concurrent_users.unwrap_or(existing.max_concurrent_users),
            prioritize_localhost: patch.prioritize_localhost.unwrap_or(existing.prioritize_localhost),
        };
        *guard = Some(merged.clone());
        Ok(merged)
    }
}
