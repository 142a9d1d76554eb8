// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable local store interface and backends.
//!
//! Holds per-unit state that must survive between events: the mirrored
//! schema-initialised flag, the paused flag and every restart nonce. Writes are
//! buffered until [`LocalStore::flush`]; reads see buffered writes.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryLocalStore;
pub use self::sqlite::SqliteLocalStore;

use async_trait::async_trait;

use crate::error::Result;

/// Local store key of the mirrored schema-initialised flag.
pub const SCHEMA_INITIALIZED_KEY: &str = "db-initialised";

/// Local store key set while the unit is administratively paused.
pub const UNIT_PAUSED_KEY: &str = "unit-paused";

/// Per-unit durable key/value storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read a value, including writes not yet flushed.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Buffer a write.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Make every buffered write durable.
    async fn flush(&self) -> Result<()>;
}

/// Interpret a stored flag. Accepts the spellings peers have historically used.
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "yes" | "1" | "on")
    )
}
