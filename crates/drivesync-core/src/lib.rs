//! DriveSync Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `TrackedItem`, `SyncState`, `ChangeSet`, `Action`, `ConflictRecord`
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `ILocalFileSystem`,
//!   `IStateStore`, `ITokenProvider`
//! - **State machine** - Sync cycle phases
//! - **Configuration** - YAML configuration with validation
//!
//! # Architecture
//!
//! The domain module contains pure data types with no I/O.
//! Ports define trait interfaces that adapter crates implement.
//! The sync engine drives domain values through the ports.

pub mod config;
pub mod domain;
pub mod ports;
