//! The abstract DHCP client contract and the state shared by both concrete
//! back-ends. Generalizes this codebase's `state_switcher::{Input, Output}`
//! async-trait pattern (a single supervisor trait, implemented by two
//! concrete types) to a process supervisor instead of a packet pipeline
//! stage.

use std::fmt;
use std::path::PathBuf;
use std::sync::Weak;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::decoder::{decode_ip4_config, OptionBlob};
use crate::core::ip4_config::Ip4Config;
use crate::core::manager::Manager;
use crate::core::state::DhcpState;

/// Opaque client identity; in practice the helper's OS process id. Wrapped
/// so it can't be confused with other numeric ids at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A kernel-limited interface name (`IFNAMSIZ` = 16 bytes including the NUL
/// terminator on Linux, so 15 usable characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceName(String);

impl InterfaceName {
    pub const MAX_LEN: usize = 15;

    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > Self::MAX_LEN {
            return None;
        }
        Some(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// String identifier of a user-configured connection profile.
pub type ConnectionUuid = str;

/// The subset of a connection's IPv4 settings the DHCP layer consults:
/// whether to send a hostname, and an explicit hostname if one was
/// configured.
#[derive(Debug, Clone, Default)]
pub struct Ipv4Settings {
    pub send_hostname: bool,
    pub dhcp_hostname: Option<String>,
}

/// The two signals a [`DhcpClient`] emits, observable through
/// [`crate::core::manager::Manager::subscribe`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged {
        iface: InterfaceName,
        pid: ClientId,
        state: DhcpState,
    },
    Timeout {
        iface: InterfaceName,
        pid: ClientId,
    },
}

/// Uniform start/stop/query contract shared by both concrete back-ends.
#[async_trait]
pub trait DhcpClient: Send + Sync {
    /// Spawns the helper, registers the PID, arms the timeout. Returns
    /// success iff the spawn succeeded; on failure the client has already
    /// torn itself down and must not be added to any registry.
    async fn start(
        &mut self,
        uuid: &str,
        settings: &Ipv4Settings,
        timeout_seconds: u64,
        anycast_mac: Option<[u8; 6]>,
    ) -> bool;

    /// Idempotent: sends SIGTERM if the PID file is current, then removes
    /// the PID file and disarms the timeout.
    async fn stop(&mut self);

    fn get_iface(&self) -> &InterfaceName;
    fn get_pid(&self) -> Option<ClientId>;
    fn state(&self) -> DhcpState;

    /// Updates state and the decoded config from an inbound bus event.
    /// Safe to call after the helper has exited: late events are logged
    /// and dropped.
    fn new_options(&mut self, blob: &OptionBlob, reason: &str);

    /// The most recent fully-realized configuration, i.e. the snapshot
    /// produced when the helper last entered a BOUND/RENEW/REBIND/REBOOT
    /// state. `test_only` callers accept a config even when the client was
    /// never added to a Manager's registry.
    fn get_ip4_config(&self, test_only: bool) -> Option<Ip4Config>;

    /// Called by the timer task when the one-shot start timeout fires
    /// without the client having reached a lease-bearing state.
    fn force_timeout(&mut self);

    /// Called by the exit-watcher task once the helper process has
    /// exited, distinguishing a clean exit from a crash or signal.
    fn force_process_exit(&mut self, success: bool);
}

/// Fields and behavior common to both concrete clients.
pub(crate) struct ClientCore {
    pub iface: InterfaceName,
    pub pid: Option<ClientId>,
    pub pid_file: PathBuf,
    pub state: DhcpState,
    pub ip4_config: Option<Ip4Config>,
    pub manager: Weak<Manager>,
    timer_cancel: std::sync::Arc<Notify>,
    timer_disarmed: bool,
}

impl ClientCore {
    pub fn new(iface: InterfaceName, pid_file: PathBuf, manager: Weak<Manager>) -> Self {
        Self {
            iface,
            pid: None,
            pid_file,
            state: DhcpState::Preinit,
            ip4_config: None,
            manager,
            timer_cancel: std::sync::Arc::new(Notify::new()),
            timer_disarmed: true,
        }
    }

    /// Arms the one-shot start timeout. Fires [`ClientEvent::Timeout`] and
    /// [`DhcpClient::force_timeout`] through the owning [`Manager`] unless
    /// disarmed first.
    pub fn arm_timeout(&mut self, timeout_seconds: u64) {
        self.timer_disarmed = false;
        let cancel = self.timer_cancel.clone();
        let manager = self.manager.clone();
        let iface = self.iface.clone();
        let pid = self.pid;
        let Some(pid) = pid else { return };

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(timeout_seconds)) => {
                    if let Some(manager) = manager.upgrade() {
                        manager.on_client_timeout(&iface, pid).await;
                    }
                }
                _ = cancel.notified() => {}
            }
        });
    }

    /// Disarms the timer. Idempotent.
    pub fn disarm_timeout(&mut self) {
        if !self.timer_disarmed {
            self.timer_disarmed = true;
            self.timer_cancel.notify_one();
        }
    }

    /// Applies a decoded `reason` to the shared state machine. Returns the
    /// new state, or `None` if `reason` was unknown (logged by the caller
    /// as a no-op).
    pub fn apply_reason(&mut self, blob: &OptionBlob, reason: &str) -> Option<DhcpState> {
        let new_state = match DhcpState::from_reason(reason) {
            Some(s) => s,
            None => {
                log::warn!(
                    "{}: unknown DHCP reason '{reason}', ignoring",
                    self.iface
                );
                return None;
            }
        };

        if new_state.is_lease_bearing() {
            let config = decode_ip4_config(blob);
            if !config.has_address() {
                log::warn!(
                    "{}: DHCP event '{reason}' decoded no usable address, collapsing to FAIL",
                    self.iface
                );
                self.state = DhcpState::Fail;
                self.disarm_timeout();
                return Some(DhcpState::Fail);
            }
            let changed = self.ip4_config.as_ref() != Some(&config);
            if changed || new_state != self.state {
                self.ip4_config = Some(config);
            }
            self.disarm_timeout();
        } else if matches!(
            new_state,
            DhcpState::Abend | DhcpState::End | DhcpState::Fail
        ) {
            self.disarm_timeout();
        }

        self.state = new_state;
        Some(new_state)
    }

    /// Emits `state-changed` and, for states the Manager reaps on
    /// (ABEND/END/TIMEOUT/FAIL), asks the Manager to remove this client
    /// from its registry.
    pub fn emit_and_maybe_reap(&self, state: DhcpState) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let Some(pid) = self.pid else { return };
        manager.emit(ClientEvent::StateChanged {
            iface: self.iface.clone(),
            pid,
            state,
        });
        if matches!(
            state,
            DhcpState::Abend | DhcpState::End | DhcpState::Fail | DhcpState::Timeout
        ) {
            manager.reap_client(&self.iface, pid);
        }
    }
}
