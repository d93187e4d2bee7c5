//! GUI-independent entry point into the Haio mount engine.
//!
//! Re-exports `haio-client`'s `core` module so headless consumers (the CLI,
//! future scripting bindings) can depend on the mount/reconcile/persistence
//! engine without pulling in Tauri or any webview runtime. `haio-client`
//! builds its `core` module unconditionally, so this crate simply disables
//! the `gui` feature and re-exports what's left.

pub use haio_client_lib::core::*;
