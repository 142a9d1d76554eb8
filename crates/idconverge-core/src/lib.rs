// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! idconverge - Convergence Engine for a Clustered Identity Service
//!
//! This crate decides what one unit of a clustered, database-backed identity
//! service should do in response to a change notification. Every unit runs the
//! same engine; at most one of them is the elected coordinator. Units cooperate
//! only through relation buckets and coordinator settings, and the engine
//! converges them without ever running the schema migration twice or bouncing a
//! service without cause.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Hosting Runtime                                  │
//! │         (delivers events, owns relations and leadership)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ Event
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Engine                                        │
//! │   route ─► handler (gates, stage writes + restart intents) ─► commit    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!      │               │                 │                     │
//!      ▼               ▼                 ▼                     ▼
//! ┌──────────┐  ┌─────────────┐  ┌───────────────┐  ┌─────────────────────┐
//! │ Relation │  │ Leadership  │  │  Local store  │  │    Capabilities     │
//! │  store   │  │   oracle    │  │   (SQLite)    │  │ backend, services,  │
//! │          │  │             │  │ flags, nonces │  │ migrator, configs   │
//! └──────────┘  └─────────────┘  └───────────────┘  └─────────────────────┘
//! ```
//!
//! # Gates
//!
//! Handlers that write to the identity backend check, in order:
//!
//! | Gate | Source | On failure |
//! |------|--------|------------|
//! | Coordinator | leadership oracle | defer (non-coordinators relay peer-stored settings) |
//! | Database reachable | `shared-db` buckets | defer |
//! | Schema initialised | local flag or coordinator setting | defer |
//! | HA formed | `ha` buckets, when VIPs or DNS-HA are configured | defer |
//!
//! Deferrals are not errors. The next event (at worst the periodic re-check)
//! runs the same checks again.
//!
//! # Restarts
//!
//! Restarts are requested as intents and committed after the handler returns.
//! An intent fires when its nonce differs from the one recorded in the local
//! store; an absent or empty nonce never fires. Every service is bounced at
//! most once per event, and not at all while the unit is paused.
//!
//! | Subsystem key | Nonce source |
//! |---------------|--------------|
//! | `config-digest:<path>` | digest of the rendered file |
//! | `domain-restart-nonce-<domain>` | domain backend's `restart-nonce` |
//! | `fid-restart-nonce-<relation>` | federated provider's `restart-nonce` |
//!
//! # Configuration
//!
//! The dry-run binary is configured from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `IDCONVERGE_SNAPSHOT_PATH` | Yes | - | JSON world snapshot |
//! | `IDCONVERGE_STATE_PATH` | No | `.data/unit-state.db` | Local store file |
//! | `IDCONVERGE_SNAPSHOT_OUT` | No | - | Snapshot after dispatch |
//! | `IDCONVERGE_RELATION_ID` | No | - | Relation id of the event |
//! | `IDCONVERGE_REMOTE_UNIT` | No | - | Remote unit of the event |
//!
//! # Modules
//!
//! - [`engine`]: Dispatch, handlers, commit and status assessment
//! - [`event`]: Events, relation ids and unit ids
//! - [`relation`]: Relation store and typed bucket records
//! - [`leadership`]: Coordinator designation and settings
//! - [`persistence`]: Durable local store
//! - [`restart`]: Nonce-gated restart coordination
//! - [`readiness`]: Database, schema and cluster predicates
//! - [`ha`]: HA resource planning
//! - [`dryrun`]: Recording collaborators and world snapshots

#![deny(missing_docs)]

/// Capability traits for side-effecting collaborators.
pub mod capabilities;

/// Process configuration and deployment options.
pub mod config;

/// Recording collaborators for dry runs and tests.
pub mod dryrun;

/// Endpoint address resolution.
pub mod endpoints;

/// The convergence engine.
pub mod engine;

/// Error types with error code mapping.
pub mod error;

/// Events and identifiers.
pub mod event;

/// HA resource planning.
pub mod ha;

/// Leadership oracle.
pub mod leadership;

/// Address and netmask helpers.
pub mod net;

/// Durable per-unit state.
pub mod persistence;

/// Readiness predicates.
pub mod readiness;

/// Relation store and bucket records.
pub mod relation;

/// Restart coordination.
pub mod restart;
