pub mod client;
pub mod decoder;
pub mod dhclient;
pub mod dhcpcd;
pub mod hostname;
pub mod ip4_config;
pub mod lease;
pub mod manager;
pub mod state;
