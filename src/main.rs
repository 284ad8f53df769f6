use std::path::PathBuf;
use std::sync::Arc;

use nm_dhcp_core::bus::event;
use nm_dhcp_core::config::DhcpConfig;
use nm_dhcp_core::core::manager::Manager;
use nm_dhcp_core::utils::logger;

#[tokio::main]
async fn main() {
    if let Err(e) = logger::init_logger("nm-dhcp-daemon", 3) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config_path = std::env::var("NM_DHCP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/nm-dhcp-core.toml"));
    let config = match DhcpConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load configuration from {config_path:?}: {e}");
            std::process::exit(1);
        }
    };

    let manager = match Manager::new(config) {
        Ok(m) => m,
        Err(e) => {
            log::error!("failed to start DHCP manager: {e}");
            std::process::exit(1);
        }
    };

    run(manager).await;
}

async fn run(manager: Arc<Manager>) {
    let bus_manager = manager.clone();
    let bus_task = tokio::spawn(async move {
        if let Err(e) = event::run(move |options| {
            let manager = bus_manager.clone();
            tokio::spawn(async move {
                manager.handle_event(&options).await;
            });
        })
        .await
        {
            log::error!("bus event loop terminated: {e}");
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("failed to listen for shutdown signal: {e}");
    }
    // Deliberately does not stop() any client: helpers keep running so a
    // restarted daemon can rediscover an active lease via its PID file.
    log::info!("shutting down, leaving {} active DHCP helper(s) running", manager.registered_interfaces().len());
    bus_task.abort();
}
