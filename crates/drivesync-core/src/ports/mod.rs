//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Remote object store operations
//! - [`ILocalFileSystem`] - Local filesystem operations
//! - [`IStateStore`] - Persistent last-synced snapshot per sync root
//! - [`ITokenProvider`] - Access token supply

pub mod local_filesystem;
pub mod remote_store;
pub mod state_store;
pub mod token_provider;

pub use local_filesystem::{FileSystemState, ILocalFileSystem, LocalEntry};
pub use remote_store::{IRemoteStore, RemoteEntry, RemoteError, RemotePage};
pub use state_store::{IStateStore, SnapshotInfo, StateStoreError};
pub use token_provider::{AccessToken, AuthError, ITokenProvider, StaticTokenProvider};
