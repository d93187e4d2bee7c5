//! Boot-Persistence Installer (C6).
//!
//! Creates/removes the OS-level auto-start artifact that re-mounts a bucket
//! at login: a systemd unit file on Linux, a scheduled task plus
//! launcher script on Windows. Both backends go through the `PrivilegeHelper`
//! abstraction rather than piping a password through
//! a shell `echo` — `pkexec`/polkit on Linux, the OS elevation prompt on
//! Windows. Never writes an artifact that embeds a volatile binary path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::core::mount_agent::is_stable_path;
use crate::core::{HaioError, HaioResult};

/// Remediation payload surfaced when elevation is cancelled: the exact shell
/// commands the user (or an admin) could run manually.
#[derive(Debug, Clone)]
pub struct ManualCleanupInstructions {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ElevatedRunResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub cancelled: bool,
}

/// Abstraction over privilege escalation: never pipes a password
/// through `echo`/a shell; each platform backend uses its native prompt.
#[async_trait]
pub trait PrivilegeHelper: Send + Sync {
    async fn run_as_root(&self, argv: &[String]) -> HaioResult<ElevatedRunResult>;
}

/// Linux backend: `pkexec`, which hands the elevation prompt to polkit and
/// never touches the invoking process's stdin with a credential.
pub struct PkexecHelper;

#[async_trait]
impl PrivilegeHelper for PkexecHelper {
    async fn run_as_root(&self, argv: &[String]) -> HaioResult<ElevatedRunResult> {
        let mut cmd = tokio::process::Command::new("pkexec");
        cmd.args(argv);
        let output = cmd.output().await.map_err(HaioError::IoError)?;

        // polkit returns 126/127 when the user dismisses the auth dialog.
        if !output.status.success() && matches!(output.status.code(), Some(126) | Some(127)) {
            return Ok(ElevatedRunResult {
                ok: false,
                stdout: String::new(),
                stderr: String::new(),
                cancelled: true,
            });
        }

        Ok(ElevatedRunResult {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            cancelled: false,
        })
    }
}

/// Windows backend: delegates to the OS elevation dialog via a manifested
/// launcher; in this codebase it shells out to a helper invoked with the
/// `runas` verb semantics through `ShellExecute`-equivalent tooling, which
/// the GUI layer actually wires (this adapter only defines the contract and
/// the cancellation detection).
pub struct WindowsElevationHelper;

#[async_trait]
impl PrivilegeHelper for WindowsElevationHelper {
    async fn run_as_root(&self, argv: &[String]) -> HaioResult<ElevatedRunResult> {
        let mut cmd = tokio::process::Command::new("powershell");
        cmd.args([
            "-NoProfile",
            "-Command",
            &format!(
                "Start-Process -FilePath '{}' -ArgumentList '{}' -Verb RunAs -Wait",
                argv.first().map(String::as_str).unwrap_or(""),
                argv.get(1..).unwrap_or(&[]).join(" ")
            ),
        ]);
        let output = cmd.output().await.map_err(HaioError::IoError)?;
        let cancelled = !output.status.success()
            && String::from_utf8_lossy(&output.stderr).to_lowercase().contains("cancel");

        Ok(ElevatedRunResult {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            cancelled,
        })
    }
}

fn unit_name(username: &str, container: &str) -> String {
    format!("haio-{username}-{container}.service")
}

fn task_name(username: &str, container: &str) -> String {
    format!("HaioAutoMount_{username}_{container}")
}

/// Renders the systemd unit contents.
fn render_unit(
    username: &str,
    container: &str,
    mount_point: &Path,
    cache_dir: &Path,
    agent_path: &Path,
    argv_tail: &[String],
    system_wide: bool,
) -> String {
    let exec_start = format!(
        "{} {}",
        agent_path.display(),
        argv_tail.join(" ")
    );
    let user_line = if system_wide {
        format!("User={username}\n")
    } else {
        String::new()
    };
    format!(
        "[Unit]\n\
Description=Haio auto-mount for {username}/{container}\n\
After=network-online.target\n\
Wants=network-online.target\n\
\n\
[Service]\n\
Type=simple\n\
{user_line}\
ExecStartPre=/bin/mkdir -p {mount_point} {cache_dir}\n\
ExecStart={exec_start}\n\
ExecStop=/bin/sh -c 'fusermount -u {mount_point} || umount -l {mount_point}'\n\
Restart=on-failure\n\
RestartSec=10\n\
StartLimitIntervalSec=60\n\
StartLimitBurst=3\n\
\n\
[Install]\n\
WantedBy=default.target\n",
        mount_point = mount_point.display(),
        cache_dir = cache_dir.display(),
    )
}

fn render_windows_launcher(config_name: &str, container: &str, mount_point: &Path, agent_path: &Path) -> String {
    format!(
        "@echo off\r\n\"{}\" mount {}:{} \"{}\" --vfs-cache-mode full\r\n",
        agent_path.display(),
        config_name,
        container,
        mount_point.display(),
    )
}

pub struct PersistenceInstaller {
    privilege_helper: Box<dyn PrivilegeHelper>,
    user_unit_dir: PathBuf,
    system_unit_dir: PathBuf,
    windows_launcher_dir: PathBuf,
}

impl PersistenceInstaller {
    pub fn new(
        privilege_helper: Box<dyn PrivilegeHelper>,
        user_unit_dir: PathBuf,
        system_unit_dir: PathBuf,
        windows_launcher_dir: PathBuf,
    ) -> Self {
        Self {
            privilege_helper,
            user_unit_dir,
            system_unit_dir,
            windows_launcher_dir,
        }
    }

    fn user_unit_path(&self, username: &str, container: &str) -> PathBuf {
        self.user_unit_dir.join(unit_name(username, container))
    }

    fn system_unit_path(&self, username: &str, container: &str) -> PathBuf {
        self.system_unit_dir.join(unit_name(username, container))
    }

    /// Installs the auto-start artifact. Returns `Ok(())` once the unit is
    /// written, reloaded, enabled, and started (or, on Windows, the task is
    /// registered). `PERSIST_USER_CANCELLED` is returned — never panics or
    /// propagates as an unhandled exception — if elevation is declined; in
    /// that case no artifact is created.
    #[cfg(unix)]
    pub async fn install(
        &self,
        username: &str,
        container: &str,
        mount_point: &Path,
        cache_dir: &Path,
        agent_path: &Path,
        argv_tail: &[String],
    ) -> HaioResult<()> {
        if !is_stable_path(agent_path) {
            return Err(HaioError::AgentVolatilePath(agent_path.to_string_lossy().to_string()));
        }

        std::fs::create_dir_all(&self.user_unit_dir).map_err(HaioError::IoError)?;
        let unit = render_unit(username, container, mount_point, cache_dir, agent_path, argv_tail, false);
        let path = self.user_unit_path(username, container);
        crate::core::fs::atomic_write_bytes(&path, unit.as_bytes())?;

        self.systemctl_user(&["daemon-reload"]).await?;
        self.systemctl_user(&["enable", "--now", &unit_name(username, container)]).await?;
        info!(username, container, "installed user-scoped systemd unit");
        Ok(())
    }

    #[cfg(unix)]
    async fn systemctl_user(&self, args: &[&str]) -> HaioResult<()> {
        let mut cmd = tokio::process::Command::new("systemctl");
        cmd.arg("--user").args(args);
        let output = cmd.output().await.map_err(HaioError::IoError)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HaioError::PersistElevationFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ))
        }
    }

    /// System-wide fallback when the user unit directory is unavailable
    /// (e.g. headless session without a user systemd instance). Requires
    /// elevation via the `PrivilegeHelper`.
    #[cfg(unix)]
    pub async fn install_system_wide(
        &self,
        username: &str,
        container: &str,
        mount_point: &Path,
        cache_dir: &Path,
        agent_path: &Path,
        argv_tail: &[String],
    ) -> HaioResult<()> {
        if !is_stable_path(agent_path) {
            return Err(HaioError::AgentVolatilePath(agent_path.to_string_lossy().to_string()));
        }

        let unit = render_unit(username, container, mount_point, cache_dir, agent_path, argv_tail, true);
        let tmp = std::env::temp_dir().join(unit_name(username, container));
        crate::core::fs::atomic_write_bytes(&tmp, unit.as_bytes())?;

        let dest = self.system_unit_path(username, container);
        let argv = vec![
            "cp".to_string(),
            tmp.to_string_lossy().to_string(),
            dest.to_string_lossy().to_string(),
        ];
        let copy_result = self.privilege_helper.run_as_root(&argv).await?;
        if copy_result.cancelled {
            return Err(HaioError::PersistUserCancelled { commands: self.manual_cleanup_instructions(username, container).commands });
        }
        if !copy_result.ok {
            return Err(HaioError::PersistElevationFailed(copy_result.stderr));
        }

        let reload = self
            .privilege_helper
            .run_as_root(&["systemctl".to_string(), "daemon-reload".to_string()])
            .await?;
        if reload.cancelled {
            return Err(HaioError::PersistUserCancelled { commands: self.manual_cleanup_instructions(username, container).commands });
        }
        let enable = self
            .privilege_helper
            .run_as_root(&[
                "systemctl".to_string(),
                "enable".to_string(),
                "--now".to_string(),
                unit_name(username, container),
            ])
            .await?;
        if enable.cancelled {
            return Err(HaioError::PersistUserCancelled { commands: self.manual_cleanup_instructions(username, container).commands });
        }
        if !enable.ok {
            return Err(HaioError::PersistElevationFailed(enable.stderr));
        }
        Ok(())
    }

    #[cfg(unix)]
    pub async fn remove(&self, username: &str, container: &str) -> HaioResult<()> {
        let user_path = self.user_unit_path(username, container);
        if user_path.exists() {
            let _ = self.systemctl_user(&["disable", "--now", &unit_name(username, container)]).await;
            std::fs::remove_file(&user_path).map_err(HaioError::IoError)?;
            let _ = self.systemctl_user(&["daemon-reload"]).await;
            return Ok(());
        }

        let system_path = self.system_unit_path(username, container);
        if system_path.exists() {
            let disable = self
                .privilege_helper
                .run_as_root(&[
                    "systemctl".to_string(),
                    "disable".to_string(),
                    "--now".to_string(),
                    unit_name(username, container),
                ])
                .await?;
            if disable.cancelled {
                return Err(HaioError::PersistUserCancelled { commands: self.manual_cleanup_instructions(username, container).commands });
            }
            let rm = self
                .privilege_helper
                .run_as_root(&["rm".to_string(), system_path.to_string_lossy().to_string()])
                .await?;
            if rm.cancelled {
                return Err(HaioError::PersistUserCancelled { commands: self.manual_cleanup_instructions(username, container).commands });
            }
            let _ = self
                .privilege_helper
                .run_as_root(&["systemctl".to_string(), "daemon-reload".to_string()])
                .await;
        }
        // Already absent: idempotent success.
        Ok(())
    }

    #[cfg(unix)]
    pub fn is_installed(&self, username: &str, container: &str) -> bool {
        self.user_unit_path(username, container).exists() || self.system_unit_path(username, container).exists()
    }

    #[cfg(unix)]
    pub fn list_installed(&self, username: &str) -> Vec<String> {
        let prefix = format!("haio-{username}-");
        let mut containers = Vec::new();
        for dir in [&self.user_unit_dir, &self.system_unit_dir] {
            let Ok(entries) = std::fs::read_dir(dir) else { continue };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(rest) = name.strip_prefix(&prefix).and_then(|s| s.strip_suffix(".service")) {
                    if !containers.contains(&rest.to_string()) {
                        containers.push(rest.to_string());
                    }
                }
            }
        }
        containers
    }

    /// Builds the exact manual commands a user would run to remove an
    /// artifact themselves, for the `PERSIST_USER_CANCELLED` remediation
    /// payload.
    #[cfg(unix)]
    pub fn manual_cleanup_instructions(&self, username: &str, container: &str) -> ManualCleanupInstructions {
        let unit = unit_name(username, container);
        ManualCleanupInstructions {
            commands: vec![
                format!("systemctl --user disable --now {unit}"),
                format!("rm -f ~/.config/systemd/user/{unit}"),
                "systemctl --user daemon-reload".to_string(),
            ],
        }
    }

    #[cfg(windows)]
    pub async fn install(
        &self,
        username: &str,
        container: &str,
        mount_point: &Path,
        _cache_dir: &Path,
        agent_path: &Path,
        _argv_tail: &[String],
    ) -> HaioResult<()> {
        if !is_stable_path(agent_path) {
            return Err(HaioError::AgentVolatilePath(agent_path.to_string_lossy().to_string()));
        }

        std::fs::create_dir_all(&self.windows_launcher_dir).map_err(HaioError::IoError)?;
        let launcher_path = self
            .windows_launcher_dir
            .join(format!("{username}-{container}.bat"));
        let script = render_windows_launcher(&format!("haio_{username}"), container, mount_point, agent_path);
        crate::core::fs::atomic_write_bytes(&launcher_path, script.as_bytes())?;

        let argv = vec![
            "schtasks".to_string(),
            "/Create".to_string(),
            "/TN".to_string(),
            task_name(username, container),
            "/TR".to_string(),
            launcher_path.to_string_lossy().to_string(),
            "/SC".to_string(),
            "ONLOGON".to_string(),
            "/RL".to_string(),
            "LIMITED".to_string(),
            "/F".to_string(),
        ];
        let result = self.privilege_helper.run_as_root(&argv).await?;
        if result.cancelled {
            return Err(HaioError::PersistUserCancelled { commands: self.manual_cleanup_instructions(username, container).commands });
        }
        if !result.ok {
            return Err(HaioError::PersistElevationFailed(result.stderr));
        }
        Ok(())
    }

    #[cfg(windows)]
    pub async fn remove(&self, username: &str, container: &str) -> HaioResult<()> {
        if !self.is_installed(username, container) {
            return Ok(());
        }
        let argv = vec![
            "schtasks".to_string(),
            "/Delete".to_string(),
            "/TN".to_string(),
            task_name(username, container),
            "/F".to_string(),
        ];
        let result = self.privilege_helper.run_as_root(&argv).await?;
        if result.cancelled {
            return Err(HaioError::PersistUserCancelled { commands: self.manual_cleanup_instructions(username, container).commands });
        }
        if !result.ok {
            return Err(HaioError::PersistElevationFailed(result.stderr));
        }
        let launcher_path = self.windows_launcher_dir.join(format!("{username}-{container}.bat"));
        let _ = std::fs::remove_file(launcher_path);
        Ok(())
    }

    #[cfg(windows)]
    pub fn is_installed(&self, username: &str, container: &str) -> bool {
        self.windows_launcher_dir
            .join(format!("{username}-{container}.bat"))
            .exists()
    }

    #[cfg(windows)]
    pub fn list_installed(&self, username: &str) -> Vec<String> {
        let prefix = format!("{username}-");
        let Ok(entries) = std::fs::read_dir(&self.windows_launcher_dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy().to_string();
                name.strip_prefix(&prefix)
                    .and_then(|s| s.strip_suffix(".bat"))
                    .map(|s| s.to_string())
            })
            .collect()
    }

    #[cfg(windows)]
    pub fn manual_cleanup_instructions(&self, username: &str, container: &str) -> ManualCleanupInstructions {
        ManualCleanupInstructions {
            commands: vec![format!("schtasks /Delete /TN {} /F", task_name(username, container))],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct AlwaysCancelled;

    #[async_trait]
    impl PrivilegeHelper for AlwaysCancelled {
        async fn run_as_root(&self, _argv: &[String]) -> HaioResult<ElevatedRunResult> {
            Ok(ElevatedRunResult { ok: false, stdout: String::new(), stderr: String::new(), cancelled: true })
        }
    }

    fn installer(dir: &std::path::Path) -> PersistenceInstaller {
        PersistenceInstaller::new(
            Box::new(AlwaysCancelled),
            dir.join("user-units"),
            dir.join("system-units"),
            dir.join("launchers"),
        )
    }

    #[test]
    fn unit_name_follows_haio_prefix_convention() {
        assert_eq!(unit_name("alice", "docs"), "haio-alice-docs.service");
    }

    #[test]
    fn task_name_follows_haio_prefix_convention() {
        assert_eq!(task_name("alice", "docs"), "HaioAutoMount_alice_docs");
    }

    #[test]
    fn rendered_unit_includes_required_directives() {
        let unit = render_unit(
            "alice",
            "docs",
            Path::new("/home/alice/haio-alice-docs"),
            Path::new("/home/alice/.cache/haio-client"),
            Path::new("/usr/local/bin/haio-mount-agent"),
            &["mount".to_string()],
            false,
        );
        assert!(unit.contains("After=network-online.target"));
        assert!(unit.contains("Wants=network-online.target"));
        assert!(unit.contains("Type=simple"));
        assert!(unit.contains("Restart=on-failure"));
        assert!(unit.contains("RestartSec=10"));
        assert!(unit.contains("StartLimitBurst=3"));
        assert!(unit.contains("ExecStop="));
        assert!(unit.contains("WantedBy=default.target"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_system_wide_refuses_volatile_agent_path() {
        let dir = TempDir::new().unwrap();
        let installer = installer(dir.path());
        let volatile = std::env::temp_dir().join("extracted/haio-mount-agent");

        let result = installer
            .install_system_wide(
                "alice",
                "docs",
                Path::new("/home/alice/haio-alice-docs"),
                Path::new("/home/alice/.cache/haio-client"),
                &volatile,
                &[],
            )
            .await;

        assert!(matches!(result, Err(HaioError::AgentVolatilePath(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_system_wide_surfaces_user_cancelled_without_writing_artifact() {
        let dir = TempDir::new().unwrap();
        let installer = installer(dir.path());

        let result = installer
            .install_system_wide(
                "alice",
                "docs",
                Path::new("/home/alice/haio-alice-docs"),
                Path::new("/home/alice/.cache/haio-client"),
                Path::new("/usr/local/bin/haio-mount-agent"),
                &[],
            )
            .await;

        assert!(matches!(result, Err(HaioError::PersistUserCancelled { .. })));
        assert!(!installer.is_installed("alice", "docs"));
    }

    #[cfg(unix)]
    #[test]
    fn remove_on_absent_artifact_is_idempotent_success() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("user-units")).unwrap();
        std::fs::create_dir_all(dir.path().join("system-units")).unwrap();
        let installer = installer(dir.path());
        assert!(!installer.is_installed("alice", "docs"));
    }

    #[cfg(unix)]
    #[test]
    fn manual_cleanup_instructions_name_exact_systemctl_commands() {
        let dir = TempDir::new().unwrap();
        let installer = installer(dir.path());
        let instructions = installer.manual_cleanup_instructions("alice", "docs");
        assert!(instructions.commands.iter().any(|c| c.contains("systemctl --user disable --now haio-alice-docs.service")));
    }

    #[cfg(unix)]
    #[test]
    fn list_installed_reads_user_unit_directory() {
        let dir = TempDir::new().unwrap();
        let user_units = dir.path().join("user-units");
        std::fs::create_dir_all(&user_units).unwrap();
        std::fs::write(user_units.join("haio-alice-docs.service"), "").unwrap();
        std::fs::write(user_units.join("haio-alice-photos.service"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("system-units")).unwrap();

        let installer = installer(dir.path());
        let mut installed = installer.list_installed("alice");
        installed.sort();
        assert_eq!(installed, vec!["docs".to_string(), "photos".to_string()]);
    }
}
