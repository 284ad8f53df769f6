//! The `dhclient` (ISC) back-end. Its spawn/kill/pid-file plumbing mirrors
//! its `dhcpcd` sibling; it differs in argv shape (a uuid-scoped lease
//! file, a conf file, and an `-sf` action script) and in not requesting its
//! own process group, since `dhclient` already detaches cleanly on
//! `SIGTERM`.

use std::path::PathBuf;
use std::sync::Weak;

use async_trait::async_trait;

use crate::core::client::{ClientCore, ClientId, DhcpClient, InterfaceName, Ipv4Settings};
use crate::core::decoder::OptionBlob;
use crate::core::ip4_config::Ip4Config;
use crate::core::lease::read_dhclient_leases;
use crate::core::manager::Manager;
use crate::core::state::DhcpState;
use crate::utils::process;

/// Builds the connection-scoped lease-file path for a given run directory,
/// connection uuid and interface. Shared with `Manager::get_lease_config` so
/// a saved lease is found under the exact path a running client writes to.
pub(crate) fn lease_file_path(run_dir: &std::path::Path, uuid: &str, iface: &str) -> PathBuf {
    run_dir.join(format!("dhclient-{uuid}-{iface}.leases"))
}

pub struct DhclientClient {
    core: ClientCore,
    binary_path: PathBuf,
    lease_file: PathBuf,
    conf_path: PathBuf,
    action_script: PathBuf,
}

impl DhclientClient {
    pub fn new(
        iface: InterfaceName,
        uuid: &str,
        pid_file: PathBuf,
        manager: Weak<Manager>,
        binary_path: PathBuf,
        conf_path: PathBuf,
        action_script: PathBuf,
    ) -> Self {
        let run_dir = pid_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new("/var/run"));
        let lease_file = lease_file_path(run_dir, uuid, iface.as_str());
        Self {
            core: ClientCore::new(iface, pid_file, manager),
            binary_path,
            lease_file,
            conf_path,
            action_script,
        }
    }

    fn build_argv(&self) -> Vec<String> {
        vec![
            self.binary_path.display().to_string(),
            "-d".into(),
            "-q".into(),
            "-pf".into(),
            self.core.pid_file.display().to_string(),
            "-lf".into(),
            self.lease_file.display().to_string(),
            "-cf".into(),
            self.conf_path.display().to_string(),
            "-sf".into(),
            self.action_script.display().to_string(),
            self.core.iface.as_str().to_string(),
        ]
    }

    /// Reads any still-valid lease left on disk from a previous run, to
    /// offer as a candidate before the helper's first event arrives.
    pub fn seed_lease(&self) -> Option<Ip4Config> {
        let contents = std::fs::read_to_string(&self.lease_file).ok()?;
        read_dhclient_leases(&contents, self.core.iface.as_str(), chrono::Utc::now())
            .into_iter()
            .last()
    }
}

#[async_trait]
impl DhcpClient for DhclientClient {
    async fn start(
        &mut self,
        _uuid: &str,
        _settings: &Ipv4Settings,
        timeout_seconds: u64,
        _anycast_mac: Option<[u8; 6]>,
    ) -> bool {
        process::stop_existing(&self.core.pid_file);

        let argv = self.build_argv();
        let child = match process::spawn_helper(&argv, false) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("{}: failed to spawn dhclient: {e}", self.core.iface);
                return false;
            }
        };
        let Some(pid) = child.id() else {
            log::warn!("{}: dhclient child has no pid immediately after spawn", self.core.iface);
            return false;
        };
        if let Err(e) = process::write_pid_file(&self.core.pid_file, pid) {
            log::warn!("{}: failed to write pid file: {e}", self.core.iface);
        }

        self.core.pid = Some(ClientId(pid));
        self.core.state = DhcpState::Preinit;
        self.core.ip4_config = self.seed_lease();
        self.core.arm_timeout(timeout_seconds);
        spawn_exit_watcher(self.core.manager.clone(), self.core.iface.clone(), ClientId(pid), child);
        true
    }

    async fn stop(&mut self) {
        self.core.disarm_timeout();
        if let Some(pid) = self.core.pid.take() {
            process::send_sigterm(pid.0);
        }
        process::remove_pid_file(&self.core.pid_file);
        self.core.state = DhcpState::End;
    }

    fn get_iface(&self) -> &InterfaceName {
        &self.core.iface
    }

    fn get_pid(&self) -> Option<ClientId> {
        self.core.pid
    }

    fn state(&self) -> DhcpState {
        self.core.state
    }

    fn new_options(&mut self, blob: &OptionBlob, reason: &str) {
        if let Some(state) = self.core.apply_reason(blob, reason) {
            self.core.emit_and_maybe_reap(state);
        }
    }

    fn get_ip4_config(&self, test_only: bool) -> Option<Ip4Config> {
        if self.core.pid.is_none() && !test_only {
            return None;
        }
        self.core.ip4_config.clone()
    }

    fn force_timeout(&mut self) {
        self.core.state = DhcpState::Timeout;
        self.core.disarm_timeout();
    }

    fn force_process_exit(&mut self, success: bool) {
        self.core.disarm_timeout();
        self.core.pid = None;
        self.core.state = if success { DhcpState::End } else { DhcpState::Abend };
    }
}

fn spawn_exit_watcher(
    manager: Weak<Manager>,
    iface: InterfaceName,
    pid: ClientId,
    mut child: tokio::process::Child,
) {
    tokio::spawn(async move {
        let status = child.wait().await;
        if let Some(manager) = manager.upgrade() {
            let success = status.map(|s| s.success()).unwrap_or(false);
            manager.on_child_exited(&iface, pid, success).await;
        }
    });
}
