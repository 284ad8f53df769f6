//! The per-process DHCP manager: a single registry of running clients,
//! dispatching inbound bus events to the right one and mediating hostname
//! lookups. Grounded in `nm-dhcp-manager.c`'s `NMDHCPManager`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::broadcast;

use crate::config::{Backend, DhcpConfig};
use crate::core::client::{ClientEvent, ClientId, DhcpClient, InterfaceName, Ipv4Settings};
use crate::core::decoder::{decode_string, OptionBlob};
use crate::core::dhclient::{lease_file_path, DhclientClient};
use crate::core::dhcpcd::DhcpcdClient;
use crate::core::hostname::{HostnameProvider, HostnameRegistration};
use crate::core::ip4_config::Ip4Config;
use crate::core::lease::{read_dhclient_leases, read_dhcpcd_leases};
use crate::errors::{DhcpError, DhcpResult};

static SINGLETON_GUARD: OnceLock<()> = OnceLock::new();

type ClientHandle = Arc<tokio::sync::Mutex<dyn DhcpClient>>;

pub struct Manager {
    config: DhcpConfig,
    backend: Backend,
    registry: Mutex<HashMap<InterfaceName, ClientHandle>>,
    hostname: HostnameRegistration,
    events: broadcast::Sender<ClientEvent>,
}

impl Manager {
    /// Constructs the process-wide Manager. A second call in the same
    /// process returns `Err(DhcpError::AlreadyInitialized)` — the original
    /// only warns on this, but a daemon that has accidentally started a
    /// second dispatcher has a real bug, not a cosmetic one.
    pub fn new(config: DhcpConfig) -> DhcpResult<Arc<Self>> {
        SINGLETON_GUARD
            .set(())
            .map_err(|_| DhcpError::AlreadyInitialized)?;
        let backend = config.backend()?;
        let (events, _rx) = broadcast::channel(64);
        Ok(Arc::new(Self {
            config,
            backend,
            registry: Mutex::new(HashMap::new()),
            hostname: HostnameRegistration::new(),
            events,
        }))
    }

    /// Test-only constructor that skips the process-wide singleton guard,
    /// so unit tests can build independent Managers in the same process.
    #[cfg(test)]
    pub fn new_for_test(config: DhcpConfig) -> Arc<Self> {
        let backend = config.backend().unwrap();
        let (events, _rx) = broadcast::channel(64);
        Arc::new(Self {
            config,
            backend,
            registry: Mutex::new(HashMap::new()),
            hostname: HostnameRegistration::new(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_hostname_provider(&self, provider: Option<Arc<dyn HostnameProvider>>) {
        self.hostname.set(provider);
    }

    /// Starts a client for `iface`, dispatching on the configured backend
    /// selector (never hard-wired to one concrete type). Any existing
    /// client for this interface is stopped and kill-and-relaunched first:
    /// this implementation never adopts a pre-existing PID across a
    /// restart.
    pub async fn start(
        self: &Arc<Self>,
        iface: InterfaceName,
        uuid: &str,
        mut settings: Ipv4Settings,
        timeout_seconds: u64,
        anycast_mac: Option<[u8; 6]>,
    ) -> DhcpResult<()> {
        if let Some(existing) = self.registry.lock().unwrap().remove(&iface) {
            existing.lock().await.stop().await;
        }

        if settings.send_hostname && settings.dhcp_hostname.is_none() {
            settings.dhcp_hostname = self.hostname.get();
        }

        let pid_file = self.config.pid_file(self.backend, iface.as_str());
        let manager_ref = Arc::downgrade(self);

        let mut client: Box<dyn DhcpClient> = match self.backend {
            Backend::Dhclient => Box::new(DhclientClient::new(
                iface.clone(),
                uuid,
                pid_file,
                manager_ref,
                self.config.binary_path(Backend::Dhclient).to_path_buf(),
                self.config.dhclient_conf_path.clone(),
                self.config.action_script_path.clone(),
            )),
            Backend::Dhcpcd => Box::new(DhcpcdClient::new(
                iface.clone(),
                pid_file,
                manager_ref,
                self.config.binary_path(Backend::Dhcpcd).to_path_buf(),
                self.config.action_script_path.clone(),
            )),
        };

        let started = client.start(uuid, &settings, timeout_seconds, anycast_mac).await;
        if !started {
            return Err(DhcpError::SpawnFailed {
                iface: iface.as_str().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "helper spawn failed"),
            });
        }

        self.registry
            .lock()
            .unwrap()
            .insert(iface, Arc::new(tokio::sync::Mutex::new(client)));
        Ok(())
    }

    pub async fn stop(&self, iface: &InterfaceName) {
        if let Some(client) = self.registry.lock().unwrap().remove(iface) {
            client.lock().await.stop().await;
        }
    }

    /// Decodes `interface`/`pid`/`reason` from an inbound event, locates the
    /// matching client by PID first, then verifies that client's interface
    /// matches the event's declared interface as a defense against PID
    /// reuse, and forwards the full option blob. Malformed or unresolvable
    /// events are logged and dropped — they must never crash the dispatch
    /// loop.
    pub async fn handle_event(&self, options: &OptionBlob) {
        if let Err(e) = self.try_handle_event(options).await {
            log::warn!("{e}");
        }
    }

    async fn try_handle_event(&self, options: &OptionBlob) -> DhcpResult<()> {
        let iface_str = decode_string(options, "interface")
            .ok_or_else(|| DhcpError::MalformedEvent("<unknown>".to_string(), "missing 'interface'"))?;
        let pid_str = decode_string(options, "pid")
            .ok_or_else(|| DhcpError::MalformedEvent(iface_str.clone(), "missing 'pid'"))?;
        let pid: u32 = pid_str
            .trim()
            .parse()
            .map_err(|_| DhcpError::MalformedEvent(iface_str.clone(), "non-numeric 'pid'"))?;
        let reason = decode_string(options, "reason")
            .ok_or_else(|| DhcpError::MalformedEvent(iface_str.clone(), "missing 'reason'"))?;

        let handles: Vec<ClientHandle> = self.registry.lock().unwrap().values().cloned().collect();
        let mut matched = None;
        for handle in handles {
            let found = handle.lock().await.get_pid().map(|p| p.0) == Some(pid);
            if found {
                matched = Some(handle);
                break;
            }
        }
        let handle = matched.ok_or(DhcpError::UnknownPid(pid))?;

        let mut client = handle.lock().await;
        if client.get_iface().as_str() != iface_str {
            return Err(DhcpError::MalformedEvent(
                iface_str,
                "interface mismatch for pid, possible pid reuse",
            ));
        }
        client.new_options(options, &reason);
        Ok(())
    }

    /// Called from a client's exit-watcher task once its helper process
    /// has exited. `success` distinguishes a clean exit (state `End`) from
    /// a crash or signal (state `Abend`).
    pub(crate) async fn on_child_exited(&self, iface: &InterfaceName, pid: ClientId, success: bool) {
        let handle = self.registry.lock().unwrap().get(iface).cloned();
        let Some(handle) = handle else { return };
        let mut client = handle.lock().await;
        if client.get_pid() != Some(pid) {
            return;
        }
        client.force_process_exit(success);
        drop(client);
        self.emit(ClientEvent::StateChanged {
            iface: iface.clone(),
            pid,
            state: if success { crate::core::state::DhcpState::End } else { crate::core::state::DhcpState::Abend },
        });
        self.registry.lock().unwrap().remove(iface);
    }

    /// Called from the per-client timeout timer. Forces the client into
    /// `Timeout`, emits the signal, and reaps it from the registry.
    pub(crate) async fn on_client_timeout(&self, iface: &InterfaceName, pid: ClientId) {
        let handle = self.registry.lock().unwrap().get(iface).cloned();
        let Some(handle) = handle else { return };
        let mut client = handle.lock().await;
        if client.get_pid() != Some(pid) {
            return;
        }
        client.force_timeout();
        drop(client);
        log::warn!("{}", DhcpError::Timeout(iface.as_str().to_string()));
        self.emit(ClientEvent::Timeout {
            iface: iface.clone(),
            pid,
        });
        self.registry.lock().unwrap().remove(iface);
    }

    /// Removes `iface` from the registry. Only called from
    /// `ClientCore::emit_and_maybe_reap`, which runs while the caller still
    /// holds that very client's lock — a concurrent `start()` racing to
    /// replace this entry would block acquiring the same lock and cannot
    /// have inserted its replacement yet, so an unconditional removal here
    /// is safe.
    pub(crate) fn reap_client(&self, iface: &InterfaceName, _pid: ClientId) {
        self.registry.lock().unwrap().remove(iface);
    }

    pub async fn get_ip4_config(&self, iface: &InterfaceName) -> Option<Ip4Config> {
        let handle = self.registry.lock().unwrap().get(iface).cloned()?;
        handle.lock().await.get_ip4_config(false)
    }

    /// Reads lease candidates for `(iface, uuid)` straight off disk, the
    /// same way a freshly started client would seed itself, without
    /// actually starting one. Dispatches on the configured backend just
    /// like `start()` does.
    pub fn get_lease_config(&self, iface: &InterfaceName, uuid: &str) -> Vec<Ip4Config> {
        match self.backend {
            Backend::Dhclient => {
                let run_dir = self.config.run_dir.clone();
                let lease_file = lease_file_path(&run_dir, uuid, iface.as_str());
                let Ok(contents) = std::fs::read_to_string(&lease_file) else {
                    return Vec::new();
                };
                read_dhclient_leases(&contents, iface.as_str(), chrono::Utc::now())
            }
            Backend::Dhcpcd => {
                let pid_file = self.config.pid_file(Backend::Dhcpcd, iface.as_str());
                read_dhcpcd_leases(&pid_file, iface.as_str())
            }
        }
    }

    pub fn registered_interfaces(&self) -> Vec<InterfaceName> {
        self.registry.lock().unwrap().keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn register_for_test(&self, iface: InterfaceName, client: Box<dyn DhcpClient>) {
        self.registry
            .lock()
            .unwrap()
            .insert(iface, Arc::new(tokio::sync::Mutex::new(client)));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::core::state::DhcpState;

    fn iface(s: &str) -> InterfaceName {
        InterfaceName::new(s).unwrap()
    }

    /// Minimal registry-only double: reports a fixed pid/interface and
    /// records whether an event ever reached it, without spawning any
    /// process.
    struct FakeClient {
        iface: InterfaceName,
        pid: ClientId,
        delivered: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DhcpClient for FakeClient {
        async fn start(&mut self, _: &str, _: &Ipv4Settings, _: u64, _: Option<[u8; 6]>) -> bool {
            true
        }
        async fn stop(&mut self) {}
        fn get_iface(&self) -> &InterfaceName {
            &self.iface
        }
        fn get_pid(&self) -> Option<ClientId> {
            Some(self.pid)
        }
        fn state(&self) -> DhcpState {
            DhcpState::Preinit
        }
        fn new_options(&mut self, _: &OptionBlob, _: &str) {
            self.delivered.store(true, Ordering::SeqCst);
        }
        fn get_ip4_config(&self, _: bool) -> Option<Ip4Config> {
            None
        }
        fn force_timeout(&mut self) {}
        fn force_process_exit(&mut self, _: bool) {}
    }

    fn event_blob(iface: &str, pid: u32, reason: &str) -> OptionBlob {
        let mut blob = OptionBlob::new();
        blob.insert("interface".into(), iface.as_bytes().to_vec());
        blob.insert("pid".into(), pid.to_string().into_bytes());
        blob.insert("reason".into(), reason.as_bytes().to_vec());
        blob
    }

    #[tokio::test]
    async fn handle_event_on_unknown_pid_is_a_no_op() {
        let manager = Manager::new_for_test(DhcpConfig::default());
        manager.handle_event(&event_blob("eth9", 4242, "BOUND")).await;
        assert!(manager.registered_interfaces().is_empty());
    }

    #[tokio::test]
    async fn handle_event_delivers_to_the_client_matching_the_pid() {
        let manager = Manager::new_for_test(DhcpConfig::default());
        let delivered = Arc::new(AtomicBool::new(false));
        manager.register_for_test(
            iface("eth0"),
            Box::new(FakeClient {
                iface: iface("eth0"),
                pid: ClientId(4242),
                delivered: delivered.clone(),
            }),
        );

        manager.handle_event(&event_blob("eth0", 4242, "BOUND")).await;
        assert!(delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handle_event_rejects_reused_pid_on_the_wrong_interface() {
        let manager = Manager::new_for_test(DhcpConfig::default());
        let delivered = Arc::new(AtomicBool::new(false));
        manager.register_for_test(
            iface("eth0"),
            Box::new(FakeClient {
                iface: iface("eth0"),
                pid: ClientId(4242),
                delivered: delivered.clone(),
            }),
        );

        // Same pid as the registered eth0 client, but the event claims a
        // different interface — a stale pid reused by an unrelated process
        // must not be routed to eth0's client.
        manager.handle_event(&event_blob("eth1", 4242, "BOUND")).await;
        assert!(!delivered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_on_interface_with_no_client_is_a_no_op() {
        let manager = Manager::new_for_test(DhcpConfig::default());
        manager.stop(&iface("eth0")).await;
    }

    #[tokio::test]
    async fn get_ip4_config_on_unregistered_interface_is_none() {
        let manager = Manager::new_for_test(DhcpConfig::default());
        assert!(manager.get_ip4_config(&iface("eth0")).await.is_none());
    }

    #[test]
    fn get_lease_config_on_dhcpcd_backend_is_always_empty() {
        let mut config = DhcpConfig::default();
        config.backend = crate::config::BackendName("dhcpcd".to_string());
        let manager = Manager::new_for_test(config);
        assert!(manager.get_lease_config(&iface("eth0"), "some-uuid").is_empty());
    }

    #[test]
    fn get_lease_config_on_dhclient_backend_reads_nothing_without_a_lease_file() {
        let manager = Manager::new_for_test(DhcpConfig::default());
        assert!(manager.get_lease_config(&iface("eth0"), "some-uuid").is_empty());
    }
}
