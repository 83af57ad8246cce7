//! Integration tests for drivesync-sync
//!
//! Runs full sync cycles between a temp directory and a folder-backed
//! remote, with SQLite holding the sync state.

mod common;

mod test_cycle;
mod test_faults;
