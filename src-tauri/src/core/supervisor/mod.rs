//! Mount Supervisor (C5).
//!
//! Owns the per-bucket state machine: `UNMOUNTED → MOUNTING →
//! MOUNTED → DEGRADED → UNMOUNTING → UNMOUNTED`, with `FAILED` reachable
//! from any state on a fatal error. Operations on the same `(username,
//! container)` are serialized by a keyed lock; different keys proceed in
//! parallel, mirroring the teacher's `Arc<Mutex<HashMap<JobId, JobHandle>>>`
//! bookkeeping in `core/jobs/worker.rs`, generalized from a priority job
//! queue to a per-bucket mutex map.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::mount_agent::{self, AgentConfigEntry, MountOptions, UnmountMode};
use crate::core::mount_point::{self, Classification};
use crate::core::types::{BucketKey, Mount, MountState};
use crate::core::{HaioError, HaioResult};

const MAX_MOUNT_ATTEMPTS: u32 = 3;
const MOUNT_ATTEMPT_BACKOFF: Duration = Duration::from_secs(2);
const MOUNT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);
const MOUNT_VERIFY_POLL: Duration = Duration::from_millis(250);
const UNMOUNT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Emitted to the view-model bus (C9) as bucket operations progress.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    ProgressStep { key: BucketKey, step: u32, total: u32, detail: String },
    Degraded { key: BucketKey, observed: Classification },
    StateChanged { key: BucketKey, state: MountState },
    Error { key: BucketKey, error: String },
}

struct BucketLock {
    mutex: Mutex<()>,
}

/// Per-bucket mount lifecycle owner. One instance is shared (via `Arc`)
/// across the supervisor's worker tasks and the health monitor.
pub struct Supervisor {
    mounts: RwLock<HashMap<BucketKey, Mount>>,
    locks: Mutex<HashMap<BucketKey, Arc<BucketLock>>>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    mount_agent_path: PathBuf,
    agent_config_path: PathBuf,
    health_check_interval: Duration,
}

impl Supervisor {
    pub fn new(
        mount_agent_path: PathBuf,
        agent_config_path: PathBuf,
        health_check_interval: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            mounts: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            events: tx,
            mount_agent_path,
            agent_config_path,
            health_check_interval,
        });
        (supervisor, rx)
    }

    pub fn with_default_interval(
        mount_agent_path: PathBuf,
        agent_config_path: PathBuf,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SupervisorEvent>) {
        Self::new(mount_agent_path, agent_config_path, DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    pub async fn state(&self, key: &BucketKey) -> MountState {
        self.mounts
            .read()
            .await
            .get(key)
            .map(|m| m.state)
            .unwrap_or(MountState::Unmounted)
    }

    pub async fn snapshot(&self, key: &BucketKey) -> Option<Mount> {
        self.mounts.read().await.get(key).cloned()
    }

    async fn lock_for(&self, key: &BucketKey) -> Arc<BucketLock> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(BucketLock { mutex: Mutex::new(()) }))
            .clone()
    }

    async fn set_state(&self, key: &BucketKey, state: MountState) {
        let mut mounts = self.mounts.write().await;
        let entry = mounts
            .entry(key.clone())
            .or_insert_with(|| Mount::new(&key.username, &key.container, PathBuf::new()));
        entry.state = state;
        let _ = self.events.send(SupervisorEvent::StateChanged { key: key.clone(), state });
    }

    fn emit_progress(&self, key: &BucketKey, step: u32, total: u32, detail: impl Into<String>) {
        let _ = self.events.send(SupervisorEvent::ProgressStep {
            key: key.clone(),
            step,
            total,
            detail: detail.into(),
        });
    }

    /// Resets a `FAILED` bucket back to `UNMOUNTED` so a later `mount()` call
    /// can be attempted again (terminal until `reset()`).
    pub async fn reset(&self, key: &BucketKey) {
        self.set_state(key, MountState::Unmounted).await;
    }

    /// Runs the mount procedure. Idempotent: if the
    /// target is already a live mount of this bucket, returns success without
    /// re-spawning the agent.
    pub async fn mount(
        &self,
        key: BucketKey,
        mount_point: PathBuf,
        config_name: &str,
        endpoint: &str,
        token: &str,
        cancel: CancellationToken,
    ) -> HaioResult<()> {
        let bucket_lock = self.lock_for(&key).await;
        let _guard = bucket_lock.mutex.lock().await;

        {
            let mut mounts = self.mounts.write().await;
            let entry = mounts
                .entry(key.clone())
                .or_insert_with(|| Mount::new(&key.username, &key.container, mount_point.clone()));
            entry.mount_point = mount_point.clone();
        }
        self.set_state(&key, MountState::Mounting).await;

        match self.mount_inner(&key, &mount_point, config_name, endpoint, token, &cancel).await {
            Ok(()) => {
                let mut mounts = self.mounts.write().await;
                if let Some(m) = mounts.get_mut(&key) {
                    m.started_at = Some(chrono::Utc::now());
                    m.state = MountState::Mounted;
                    m.last_health_ok = Some(true);
                }
                let _ = self.events.send(SupervisorEvent::StateChanged { key, state: MountState::Mounted });
                Ok(())
            }
            Err(e) => {
                self.set_state(&key, MountState::Failed).await;
                let _ = self.events.send(SupervisorEvent::Error { key, error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn mount_inner(
        &self,
        key: &BucketKey,
        mount_point: &std::path::Path,
        config_name: &str,
        endpoint: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> HaioResult<()> {
        // Step 1-2: classify and short-circuit if already live.
        self.emit_progress(key, 1, 7, "inspecting mount point");
        match mount_point::classify(mount_point).await {
            Classification::LiveMount => return Ok(()),
            Classification::StaleMount | Classification::NonDir => {
                self.emit_progress(key, 2, 7, "cleaning up stale mount point");
                self.clean_mount_point(mount_point).await?;
            }
            Classification::NonEmptyDir => {
                return Err(HaioError::MountPointNotEmpty(mount_point.to_string_lossy().to_string()));
            }
            Classification::EmptyDir | Classification::Absent => {
                std::fs::create_dir_all(mount_point).map_err(|e| {
                    HaioError::MountPointUncleanable(format!("{}: {e}", mount_point.display()))
                })?;
            }
        }

        // Step 5: ensure the agent config carries this account's entry.
        self.emit_progress(key, 3, 7, "writing mount agent configuration");
        let entry = AgentConfigEntry::new(&key.username, endpoint, &key.username, token);
        mount_agent::write_agent_config(&self.agent_config_path, &entry)?;

        // Step 6: spawn with retries, polling for LIVE_MOUNT visibility.
        let options = MountOptions::defaults(default_cache_dir(&key.username));
        let argv = mount_agent::build_mount_argv(config_name, &key.container, mount_point, &options);

        let mut last_err = HaioError::MountVerifyTimeout;
        for attempt in 1..=MAX_MOUNT_ATTEMPTS {
            if cancel.is_cancelled() {
                self.set_state(key, MountState::Unmounting).await;
                return Err(HaioError::Internal("mount cancelled".to_string()));
            }

            self.emit_progress(key, 4, 7, format!("spawning mount agent (attempt {attempt}/{MAX_MOUNT_ATTEMPTS})"));
            match mount_agent::spawn_mount(&self.mount_agent_path, &argv).await {
                Ok(process) => {
                    {
                        let mut mounts = self.mounts.write().await;
                        if let Some(m) = mounts.get_mut(key) {
                            m.pid = Some(process.pid());
                        }
                    }
                    self.emit_progress(key, 5, 7, "waiting for mount to become visible");
                    match self.wait_for_live(mount_point, cancel).await {
                        Ok(()) => return Ok(()),
                        Err(e) => last_err = e,
                    }
                }
                Err(e) => last_err = e,
            }

            if attempt < MAX_MOUNT_ATTEMPTS {
                tokio::time::sleep(MOUNT_ATTEMPT_BACKOFF).await;
            }
        }

        Err(last_err)
    }

    async fn wait_for_live(&self, mount_point: &std::path::Path, cancel: &CancellationToken) -> HaioResult<()> {
        let deadline = tokio::time::Instant::now() + MOUNT_VERIFY_TIMEOUT;
        loop {
            if cancel.is_cancelled() {
                return Err(HaioError::Internal("mount cancelled".to_string()));
            }
            if mount_point::classify(mount_point).await == Classification::LiveMount {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HaioError::MountVerifyTimeout);
            }
            tokio::time::sleep(MOUNT_VERIFY_POLL).await;
        }
    }

    /// Step 3 of the mount procedure: unmount whatever is wedged at
    /// `mount_point`, remove any leftover file, then recreate as an empty
    /// directory owned by the invoking user (never elevated).
    async fn clean_mount_point(&self, mount_point: &std::path::Path) -> HaioResult<()> {
        let _ = mount_agent::unmount(mount_point, UNMOUNT_ATTEMPT_TIMEOUT).await;

        if mount_point.exists() && !mount_point.is_dir() {
            std::fs::remove_file(mount_point).map_err(|e| {
                HaioError::MountPointUncleanable(format!("{}: {e}", mount_point.display()))
            })?;
        }
        if !mount_point.exists() {
            std::fs::create_dir_all(mount_point).map_err(|e| {
                HaioError::MountPointUncleanable(format!("{}: {e}", mount_point.display()))
            })?;
        }

        match mount_point::classify(mount_point).await {
            Classification::EmptyDir => Ok(()),
            other => Err(HaioError::MountPointUncleanable(format!(
                "{} still classifies as {other} after cleanup",
                mount_point.display()
            ))),
        }
    }

    /// Runs the unmount procedure. Idempotent on an already
    /// `UNMOUNTED` bucket.
    pub async fn unmount(&self, key: BucketKey, cancel: CancellationToken) -> HaioResult<()> {
        let bucket_lock = self.lock_for(&key).await;
        let _guard = bucket_lock.mutex.lock().await;

        if self.state(&key).await == MountState::Unmounted {
            return Ok(());
        }

        self.set_state(&key, MountState::Unmounting).await;
        let mount_point = match self.snapshot(&key).await {
            Some(m) if !m.mount_point.as_os_str().is_empty() => m.mount_point,
            _ => {
                self.set_state(&key, MountState::Unmounted).await;
                return Ok(());
            }
        };

        let result = self.unmount_inner(&key, &mount_point, &cancel).await;
        match &result {
            Ok(()) => {
                self.set_state(&key, MountState::Unmounted).await;
                let mut mounts = self.mounts.write().await;
                if let Some(m) = mounts.get_mut(&key) {
                    m.pid = None;
                    m.started_at = None;
                }
            }
            Err(e) => {
                self.set_state(&key, MountState::Failed).await;
                let _ = self.events.send(SupervisorEvent::Error { key: key.clone(), error: e.to_string() });
            }
        }
        result
    }

    async fn unmount_inner(
        &self,
        key: &BucketKey,
        mount_point: &std::path::Path,
        cancel: &CancellationToken,
    ) -> HaioResult<()> {
        if cancel.is_cancelled() {
            return Err(HaioError::Internal("unmount cancelled".to_string()));
        }

        match mount_agent::unmount(mount_point, UNMOUNT_ATTEMPT_TIMEOUT).await {
            Ok(mode) => info!(?mode, %key, "unmount succeeded"),
            Err(e) => {
                warn!(%key, "graceful/forced/lazy unmount fell through, escalating to signal: {e}");
                self.signal_agent_process(key).await;
            }
        }

        // Confirm the kernel mount table no longer reports the path, then
        // remove the directory if it is left empty.
        if mount_point::classify(mount_point).await == Classification::EmptyDir {
            let _ = std::fs::remove_dir(mount_point);
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn signal_agent_process(&self, key: &BucketKey) {
        let pid = self.snapshot(key).await.and_then(|m| m.pid);
        if let Some(pid) = pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
        }
    }

    #[cfg(windows)]
    async fn signal_agent_process(&self, _key: &BucketKey) {
        // Native Windows unmount/termination is driven through the agent's
        // own process handle, tracked by the caller that spawned it.
    }

    /// Probes `mount_point` and transitions `MOUNTED → DEGRADED` if the mount
    /// is no longer healthy. Called on a fixed interval.
    pub async fn health_check(&self, key: &BucketKey) {
        let Some(mount) = self.snapshot(key).await else { return };
        if mount.state != MountState::Mounted {
            return;
        }

        let observed = mount_point::classify(&mount.mount_point).await;
        let healthy = observed == Classification::LiveMount;

        let mut mounts = self.mounts.write().await;
        if let Some(m) = mounts.get_mut(key) {
            m.last_health_ok = Some(healthy);
            if !healthy {
                m.state = MountState::Degraded;
            }
        }
        drop(mounts);

        if !healthy {
            let _ = self.events.send(SupervisorEvent::Degraded { key: key.clone(), observed });
            let _ = self.events.send(SupervisorEvent::StateChanged { key: key.clone(), state: MountState::Degraded });
        }
    }

    /// Spawns a background task that calls `health_check` on `key` every
    /// `health_check_interval` until `cancel` fires.
    pub fn spawn_health_monitor(self: &Arc<Self>, key: BucketKey, cancel: CancellationToken) {
        let supervisor = Arc::clone(self);
        let interval = supervisor.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => supervisor.health_check(&key).await,
                }
            }
        });
    }
}

fn default_cache_dir(username: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("haio-client")
        .join(username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_agent(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("fake-agent.sh");
        #[cfg(unix)]
        {
            std::fs::write(&path, "#!/bin/sh\nmkdir -p \"$2\"\nsleep 60\n").unwrap();
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn unmount_on_unmounted_bucket_is_idempotent_success() {
        let dir = TempDir::new().unwrap();
        let (supervisor, _rx) = Supervisor::with_default_interval(
            fake_agent(dir.path()),
            dir.path().join("mount_agent.conf"),
        );
        let key = BucketKey::new("alice", "docs");
        assert!(supervisor.unmount(key, CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn mount_fails_fast_on_non_empty_directory() {
        let dir = TempDir::new().unwrap();
        let mount_point = dir.path().join("target");
        std::fs::create_dir(&mount_point).unwrap();
        std::fs::write(mount_point.join("existing.txt"), b"data").unwrap();

        let (supervisor, _rx) = Supervisor::with_default_interval(
            fake_agent(dir.path()),
            dir.path().join("mount_agent.conf"),
        );
        let key = BucketKey::new("alice", "docs");
        let result = supervisor
            .mount(key.clone(), mount_point, "haio_alice", "https://api.haio.ir", "tok", CancellationToken::new())
            .await;

        assert!(matches!(result, Err(HaioError::MountPointNotEmpty(_))));
        assert_eq!(supervisor.state(&key).await, MountState::Failed);
    }

    #[tokio::test]
    async fn reset_returns_failed_bucket_to_unmounted() {
        let dir = TempDir::new().unwrap();
        let (supervisor, _rx) = Supervisor::with_default_interval(
            fake_agent(dir.path()),
            dir.path().join("mount_agent.conf"),
        );
        let key = BucketKey::new("alice", "docs");
        supervisor.set_state(&key, MountState::Failed).await;
        supervisor.reset(&key).await;
        assert_eq!(supervisor.state(&key).await, MountState::Unmounted);
    }

    #[tokio::test]
    async fn health_check_ignores_non_mounted_buckets() {
        let dir = TempDir::new().unwrap();
        let (supervisor, mut rx) = Supervisor::with_default_interval(
            fake_agent(dir.path()),
            dir.path().join("mount_agent.conf"),
        );
        let key = BucketKey::new("alice", "docs");
        supervisor.health_check(&key).await;
        assert!(rx.try_recv().is_err());
    }
}
