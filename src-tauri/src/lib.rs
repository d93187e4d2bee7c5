//! Haio Client Library
//!
//! Desktop control plane for mounting Haio/Swift object-storage containers
//! as local filesystems. This library contains the GUI-independent mount
//! engine (`core`) and, when built with the `gui` feature, the Tauri IPC
//! bridge (`ipc`) and application shell below.

pub mod core;
#[cfg(feature = "gui")]
pub mod ipc;

#[cfg(feature = "gui")]
mod app {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::sync::RwLock as AsyncRwLock;
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    use crate::core::api_client::{ApiClient, ContainerInfo};
    use crate::core::config::{Config, ConfigManager};
    use crate::core::credentials::CredentialStore;
    use crate::core::mount_agent;
    use crate::core::persistence::PersistenceInstaller;
    #[cfg(unix)]
    use crate::core::persistence::PkexecHelper;
    use crate::core::persistence::PrivilegeHelper;
    #[cfg(windows)]
    use crate::core::persistence::WindowsElevationHelper;
    use crate::core::reconcile::{ContainerLister, MountDriver, PersistenceQuery, ReconcileEngine};
    use crate::core::supervisor::Supervisor;
    use crate::core::tempurl::TempUrlKeyManager;
    use crate::core::{BucketKey, MountState};
    use crate::core::HaioResult;

    /// Concrete instantiation of the reconciliation engine (C7) wiring the
    /// API client, persistence installer, and mount supervisor directly —
    /// the only place these three components are nailed to concrete types.
    pub type HaioReconcileEngine = ReconcileEngine<Arc<ApiClient>, Arc<PersistenceInstaller>, Arc<Supervisor>>;

    #[async_trait]
    impl ContainerLister for Arc<ApiClient> {
        async fn list_containers(&self) -> HaioResult<Vec<ContainerInfo>> {
            ApiClient::list_containers(self).await
        }
    }

    #[async_trait]
    impl PersistenceQuery for Arc<PersistenceInstaller> {
        fn list_installed(&self, username: &str) -> Vec<String> {
            PersistenceInstaller::list_installed(self, username)
        }

        async fn remove(&self, username: &str, container: &str) -> HaioResult<()> {
            PersistenceInstaller::remove(self, username, container).await
        }

        fn manual_cleanup_instructions(&self, username: &str, container: &str) -> Vec<String> {
            PersistenceInstaller::manual_cleanup_instructions(self, username, container).commands
        }
    }

    #[async_trait]
    impl MountDriver for Arc<Supervisor> {
        async fn current_state(&self, key: &BucketKey) -> MountState {
            Supervisor::state(self, key).await
        }

        async fn unmount(&self, key: BucketKey, cancel: CancellationToken) -> HaioResult<()> {
            Supervisor::unmount(self, key, cancel).await
        }
    }

    #[cfg(unix)]
    pub fn build_privilege_helper() -> Box<dyn PrivilegeHelper> {
        Box::new(PkexecHelper)
    }

    #[cfg(windows)]
    pub fn build_privilege_helper() -> Box<dyn PrivilegeHelper> {
        Box::new(WindowsElevationHelper)
    }

    /// Everything owned by one logged-in account: the authenticated API
    /// client, the mount supervisor (C5), the reconciliation engine (C7),
    /// the boot-persistence installer (C6), and the TempURL key manager
    /// (C8). Replaced wholesale on `login`/`logout` rather than mutated in
    /// place, since switching accounts means every one of these is stale.
    pub struct Session {
        pub username: String,
        pub base_url: String,
        pub home: PathBuf,
        pub api_client: Arc<ApiClient>,
        pub supervisor: Arc<Supervisor>,
        pub persistence: Arc<PersistenceInstaller>,
        pub tempurl: Arc<TempUrlKeyManager>,
        pub reconcile: Arc<HaioReconcileEngine>,
        pub cancel: CancellationToken,
    }

    impl Drop for Session {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    /// Application state shared across all Tauri commands.
    pub struct AppState {
        pub config: AsyncRwLock<Config>,
        pub credentials: CredentialStore,
        /// Resolved once at startup (C3 resolution order); `None` if no
        /// agent binary could be found, surfaced as `AGENT_NOT_FOUND` on the
        /// first mount attempt rather than at launch.
        pub mount_agent_path: Option<PathBuf>,
        pub session: AsyncMutex<Option<Session>>,
    }

    impl AppState {
        pub fn load() -> Self {
            let mut config = Config::default();
            config.apply_env_overrides();
            let manager = ConfigManager::new(config.config_dir.clone());
            let mut config = manager.load();
            config.apply_env_overrides();
            config.normalize();

            let credentials = match CredentialStore::open(&config.config_dir) {
                Ok(store) => store,
                Err(err) => {
                    warn!(error = %err, "credential store unavailable, accounts will not persist across restarts");
                    // `open` only fails on I/O errors constructing the vault fallback path;
                    // retry once more against a throwaway directory so the app still starts.
                    CredentialStore::open(&std::env::temp_dir())
                        .expect("credential store must be constructible against the temp directory")
                }
            };

            let mount_agent_path = match mount_agent::resolve_agent_binary(config.mount_agent_path_override.as_deref()) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = %err, "mount agent binary could not be resolved at startup");
                    None
                }
            };

            Self {
                config: AsyncRwLock::new(config),
                credentials,
                mount_agent_path,
                session: AsyncMutex::new(None),
            }
        }
    }

    /// Initializes file-rotated structured logging in `{config_dir}/logs`.
    /// Returns the guard that must be held for the process lifetime to keep
    /// the non-blocking writer flushing.
    pub fn init_logging(config_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
        let log_dir = config_dir.join("logs");
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "haio-client.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();

        guard
    }

    /// Initializes and runs the Tauri application.
    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        let state = AppState::load();
        let config_dir = {
            // `load()` has already normalized/overridden the config; read it back
            // synchronously since no webview has started yet to contend for the lock.
            state.config.try_read().expect("no contention before tauri::Builder::run").config_dir.clone()
        };
        let _log_guard = init_logging(&config_dir);
        info!("haio-client starting");

        tauri::Builder::default()
            .plugin(tauri_plugin_dialog::init())
            .plugin(tauri_plugin_updater::Builder::new().build())
            .manage(state)
            .invoke_handler(tauri::generate_handler![
                crate::ipc::commands::account::login,
                crate::ipc::commands::account::logout,
                crate::ipc::commands::account::forget_account,
                crate::ipc::commands::account::list_known_accounts,
                crate::ipc::commands::buckets::list_buckets,
                crate::ipc::commands::buckets::mount,
                crate::ipc::commands::buckets::unmount,
                crate::ipc::commands::buckets::toggle_persist,
                crate::ipc::commands::share::share,
                crate::ipc::commands::share::validate_share_url,
                crate::ipc::commands::share::browse,
                crate::ipc::commands::config::get_config,
                crate::ipc::commands::config::save_config,
                crate::ipc::commands::mount_cleanup::cleanup_orphan_mounts,
            ])
            .run(tauri::generate_context!())
            .expect("error while running tauri application");
    }
}

#[cfg(feature = "gui")]
pub use app::{build_privilege_helper, init_logging, run, AppState, HaioReconcileEngine, Session};
