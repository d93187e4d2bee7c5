//! Headless CLI for the Haio mount client.
//!
//! Wraps `haio-core` directly: every subcommand builds its own short-lived
//! `ApiClient`/`Supervisor` rather than talking to a running GUI session,
//! since the CLI and the desktop app are independent processes that never
//! share in-memory state (only the on-disk config, credential vault, and
//! mount-agent config file).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use haio_core::config::{Config, ConfigManager};
use haio_core::credentials::CredentialStore;
use haio_core::mount_agent;
use haio_core::supervisor::Supervisor;
use haio_core::tempurl::{self, HttpMethod, SignRequest, TempUrlKeyManager};
use haio_core::{api_client::ApiClient, mount_point};
use haio_core::{derive_mount_point, BucketKey};

#[derive(Parser)]
#[command(name = "haio-cli", about = "Headless control plane for Haio/Swift mounts", version)]
struct Cli {
    #[arg(long, env = "HAIO_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authenticate and list the account's containers.
    Containers {
        username: String,
        #[arg(long, env = "HAIO_PASSWORD")]
        password: String,
        #[arg(long)]
        remember: bool,
    },
    /// Mount a container under `~/haio-<username>-<container>` (or `--mount-point`).
    Mount {
        username: String,
        container: String,
        #[arg(long, env = "HAIO_PASSWORD")]
        password: String,
        #[arg(long)]
        mount_point: Option<PathBuf>,
    },
    /// Unmount a previously mounted container.
    Unmount { username: String, container: String, mount_point: Option<PathBuf> },
    /// Sign a TempURL for an object.
    Share {
        username: String,
        container: String,
        object: String,
        #[arg(long, env = "HAIO_PASSWORD")]
        password: String,
        #[arg(long, default_value_t = 3600)]
        duration_s: u64,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        prefix: bool,
    },
    /// Check whether a signed TempURL is still valid.
    ValidateUrl { url: String },
    /// Classify a filesystem path (ABSENT/EMPTY_DIR/LIVE_MOUNT/...).
    Classify { path: PathBuf },
    /// List accounts with saved credentials.
    Accounts,
    /// Resolve the mount-agent binary and report where it was found.
    Doctor,
}

fn load_config() -> Config {
    let mut config = Config::default();
    config.apply_env_overrides();
    let manager = ConfigManager::new(config.config_dir.clone());
    let mut config = manager.load();
    config.apply_env_overrides();
    config.normalize();
    config
}

async fn authenticated_client(base_url: &str, timeout_s: u64, username: &str, password: &str) -> anyhow::Result<ApiClient> {
    let client = ApiClient::new(base_url.to_string(), Duration::from_secs(timeout_s))?;
    client.authenticate(username, username, password).await?;
    Ok(client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let mut config = load_config();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    match cli.command {
        Command::Containers { username, password, remember } => {
            let client = authenticated_client(&config.base_url, config.request_timeout_s, &username, &password).await?;
            let (token, _) = client.session_credentials().await?;
            let credentials = CredentialStore::open(&config.config_dir)?;
            credentials.save(&config.base_url, &username, &token, remember.then_some(password.as_str())).await?;
            for container in client.list_containers().await? {
                println!("{}\t{}\tbytes={}", container.name, container.count, container.bytes);
            }
        }
        Command::Mount { username, container, password, mount_point } => {
            let client = authenticated_client(&config.base_url, config.request_timeout_s, &username, &password).await?;
            let (token, endpoint) = client.session_credentials().await?;

            let agent_path = mount_agent::resolve_agent_binary(config.mount_agent_path_override.as_deref())?;
            let agent_config_path = config.config_dir.join("mount-agent.conf");
            let (supervisor, mut events) = Supervisor::new(agent_path, agent_config_path, Duration::from_secs(config.health_check_interval_s));

            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    tracing::info!(?event, "supervisor event");
                }
            });

            let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
            let mount_point = mount_point.unwrap_or_else(|| derive_mount_point(&home, &username, &container));
            let config_name = format!("haio_{username}");
            let key = BucketKey::new(username, container);

            supervisor.mount(key, mount_point.clone(), &config_name, &endpoint, &token, tokio_util::sync::CancellationToken::new()).await?;
            println!("mounted at {}", mount_point.display());
        }
        Command::Unmount { username, container, mount_point } => {
            let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
            let mount_point = mount_point.unwrap_or_else(|| derive_mount_point(&home, &username, &container));
            let mode = mount_agent::unmount(&mount_point, Duration::from_secs(5)).await?;
            println!("unmounted ({mode:?})");
        }
        Command::Share { username, container, object, password, duration_s, ip, method, prefix } => {
            let client = authenticated_client(&config.base_url, config.request_timeout_s, &username, &password).await?;
            let key_manager = TempUrlKeyManager::default();
            let key = key_manager.ensure_key(&client).await?;
            let (_, storage_url) = client.session_credentials().await?;

            let parsed = reqwest::Url::parse(&storage_url)?;
            let base = parsed.origin().ascii_serialization();
            let account_path = parsed.path().trim_end_matches('/');
            let object_path = format!("{account_path}/{container}/{object}");

            let http_method = match method.to_ascii_uppercase().as_str() {
                "PUT" => HttpMethod::Put,
                "POST" => HttpMethod::Post,
                "DELETE" => HttpMethod::Delete,
                _ => HttpMethod::Get,
            };
            let request = SignRequest { method: http_method, duration_seconds: duration_s, object_path: &object_path, ip: ip.as_deref() };
            let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?.as_secs();
            let signed = if prefix { tempurl::sign_prefix(&base, &key, now, &request) } else { tempurl::sign(&base, &key, now, &request) };
            println!("{}", signed.url);
        }
        Command::ValidateUrl { url } => {
            let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?.as_secs();
            let result = tempurl::validate(&url, now);
            println!("valid={} expires_at={:?} remaining_s={:?} reason={:?}", result.valid, result.expires_at, result.time_remaining_s, result.reason);
        }
        Command::Classify { path } => {
            println!("{}", mount_point::classify(&path).await);
        }
        Command::Accounts => {
            let credentials = CredentialStore::open(&config.config_dir)?;
            for account in credentials.list_known().await? {
                println!("{}\t{}\t{:?}", account.base_url, account.username, account.scheme);
            }
        }
        Command::Doctor => match mount_agent::resolve_agent_binary(config.mount_agent_path_override.as_deref()) {
            Ok(path) => println!("mount agent: {}", path.display()),
            Err(err) => println!("mount agent not found: {err}"),
        },
    }

    Ok(())
}
