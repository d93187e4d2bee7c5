//! Haio Core
//!
//! Platform-independent engine behind the desktop shell: credential
//! storage, the Swift/Haio account API client, the external mount-agent
//! adapter, mount-point classification, the per-bucket mount supervisor,
//! the boot-persistence installer, the reconciliation engine, the
//! TempURL signer, and the view-model types the IPC layer serializes.

pub mod api_client;
pub mod config;
pub mod credentials;
pub mod fs;
pub mod mount_agent;
pub mod mount_point;
pub mod persistence;
pub mod process;
pub mod reconcile;
pub mod supervisor;
pub mod tempurl;
pub mod viewmodel;

mod types;
pub use types::*;

mod error;
pub use error::*;
