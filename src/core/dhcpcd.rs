//! The `dhcpcd` back-end. Grounded in `nm-dhcp-dhcpcd.c`: the `setpgid(0,
//! 0)` child setup hook, the kill-before-spawn restart policy, and the
//! classless-route handling that lives in the shared decoder.

use std::path::PathBuf;
use std::sync::Weak;

use async_trait::async_trait;

use crate::core::client::{ClientCore, ClientId, DhcpClient, InterfaceName, Ipv4Settings};
use crate::core::decoder::OptionBlob;
use crate::core::ip4_config::Ip4Config;
use crate::core::lease::read_dhcpcd_leases;
use crate::core::manager::Manager;
use crate::core::state::DhcpState;
use crate::utils::process;

pub struct DhcpcdClient {
    core: ClientCore,
    binary_path: PathBuf,
    action_script: PathBuf,
}

impl DhcpcdClient {
    pub fn new(
        iface: InterfaceName,
        pid_file: PathBuf,
        manager: Weak<Manager>,
        binary_path: PathBuf,
        action_script: PathBuf,
    ) -> Self {
        Self {
            core: ClientCore::new(iface, pid_file, manager),
            binary_path,
            action_script,
        }
    }

    fn build_argv(&self) -> Vec<String> {
        vec![
            self.binary_path.display().to_string(),
            "-B".into(),
            "-K".into(),
            "-L".into(),
            "-c".into(),
            self.action_script.display().to_string(),
            self.core.iface.as_str().to_string(),
        ]
    }

    /// dhcpcd persists no re-readable lease of its own; always `None`, kept
    /// as a real call into the shared lease reader rather than a hard-coded
    /// skip so both back-ends seed through the same path.
    fn seed_lease(&self) -> Option<Ip4Config> {
        read_dhcpcd_leases(&self.core.pid_file, self.core.iface.as_str())
            .into_iter()
            .last()
    }
}

#[async_trait]
impl DhcpClient for DhcpcdClient {
    async fn start(
        &mut self,
        _uuid: &str,
        _settings: &Ipv4Settings,
        timeout_seconds: u64,
        _anycast_mac: Option<[u8; 6]>,
    ) -> bool {
        process::stop_existing(&self.core.pid_file);

        let argv = self.build_argv();
        let child = match process::spawn_helper(&argv, true) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("{}: failed to spawn dhcpcd: {e}", self.core.iface);
                return false;
            }
        };
        let Some(pid) = child.id() else {
            log::warn!("{}: dhcpcd child has no pid immediately after spawn", self.core.iface);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak as StdWeak};

    use crate::config::DhcpConfig;
    use crate::core::client::ClientEvent;
    use crate::core::manager::Manager;

    #[tokio::test(start_paused = true)]
    async fn unanswered_start_times_out_and_is_reaped() {
        let manager = Manager::new_for_test(DhcpConfig::default());
        let iface_name = InterfaceName::new("eth0").unwrap();
        let mut client = DhcpcdClient::new(
            iface_name.clone(),
            PathBuf::from("/tmp/does-not-matter.pid"),
            Arc::downgrade(&manager),
            PathBuf::from("/sbin/dhcpcd"),
            PathBuf::from("/usr/libexec/nm-dhcp-client.action"),
        );
        client.core.pid = Some(ClientId(999_999));
        client.core.arm_timeout(1);
        manager.register_for_test(iface_name.clone(), Box::new(client));

        let mut events = manager.subscribe();
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        // let the spawned timer task run
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let event = events.try_recv().expect("expected a timeout signal");
        assert!(matches!(event, ClientEvent::Timeout { .. }));
        assert!(manager.registered_interfaces().is_empty());
    }

    #[test]
    fn argv_matches_the_fixed_dhcpcd_invocation() {
        let client = DhcpcdClient::new(
            InterfaceName::new("eth0").unwrap(),
            PathBuf::from("/var/run/dhcpcd-eth0.pid"),
            StdWeak::new(),
            PathBuf::from("/sbin/dhcpcd"),
            PathBuf::from("/usr/libexec/nm-dhcp-client.action"),
        );
        let argv = client.build_argv();
        assert_eq!(
            argv,
            vec![
                "/sbin/dhcpcd".to_string(),
                "-B".to_string(),
                "-K".to_string(),
                "-L".to_string(),
                "-c".to_string(),
                "/usr/libexec/nm-dhcp-client.action".to_string(),
                "eth0".to_string(),
            ]
        );
    }
}
