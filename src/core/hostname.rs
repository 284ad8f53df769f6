//! Weak hostname-provider registration. The original's
//! `g_object_weak_ref`/`hostname_provider_destroyed` dance exists to avoid a
//! dangling read after the provider object is freed; `std::sync::Weak`
//! gives the same guarantee for free, since `upgrade()` returns `None` once
//! the provider's last `Arc` is dropped.

use std::sync::{Arc, Mutex, Weak};

pub trait HostnameProvider: Send + Sync {
    /// The system hostname to offer a DHCP server, if any is currently
    /// configured.
    fn hostname(&self) -> Option<String>;
}

#[derive(Default)]
pub struct HostnameRegistration {
    provider: Mutex<Weak<dyn HostnameProvider>>,
}

impl HostnameRegistration {
    pub fn new() -> Self {
        Self {
            provider: Mutex::new(Weak::<NoProvider>::new()),
        }
    }

    pub fn set(&self, provider: Option<Arc<dyn HostnameProvider>>) {
        let weak = provider.map(|p| Arc::downgrade(&p)).unwrap_or_default();
        *self.provider.lock().unwrap() = weak;
    }

    /// Reads the current hostname, or `None` if no provider is registered
    /// or the registered one has since been dropped.
    pub fn get(&self) -> Option<String> {
        self.provider
            .lock()
            .unwrap()
            .upgrade()
            .and_then(|p| p.hostname())
    }
}

struct NoProvider;
impl HostnameProvider for NoProvider {
    fn hostname(&self) -> Option<String> {
        None
    }
}
