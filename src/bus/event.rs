//! System-bus transport. Subscribes to the `Event` signal on
//! `org.freedesktop.nm_dhcp_client` and decodes its `a{sv}` payload into a
//! plain [`OptionBlob`] so the rest of the crate never touches `zbus`
//! types directly — the core is fully testable by constructing an
//! `OptionBlob` in-process, with no bus required.

use futures_util::StreamExt;
use zbus::Connection;
use zvariant::OwnedValue;

use crate::core::decoder::OptionBlob;
use crate::errors::DhcpResult;

const SERVICE: &str = "org.freedesktop.nm_dhcp_client";
const INTERFACE: &str = "org.freedesktop.nm_dhcp_client";
const PATH: &str = "/";
const SIGNAL: &str = "Event";

/// Connects to the system bus and drives `on_event` for every decoded
/// `Event` signal until the connection is closed. Intended to run as the
/// bus-facing half of the single cooperative event-loop task described for
/// the daemon entry point.
pub async fn run(on_event: impl Fn(OptionBlob) + Send + 'static) -> DhcpResult<()> {
    let connection = Connection::system().await?;
    let mut stream = zbus::MessageStream::from(&connection);
    while let Some(msg) = stream.next().await {
        let Ok(msg) = msg else { continue };
        let header = msg.header();
        if header.interface().map(|i| i.as_str()) != Some(INTERFACE) {
            continue;
        }
        if header.member().map(|m| m.as_str()) != Some(SIGNAL) {
            continue;
        }
        if header.path().map(|p| p.as_str()) != Some(PATH) {
            continue;
        }
        let body: Result<std::collections::HashMap<String, OwnedValue>, _> = msg.body();
        match body {
            Ok(fields) => on_event(decode_variant_map(fields)),
            Err(e) => log::warn!("malformed DHCP event payload: {e}"),
        }
    }
    Ok(())
}

fn decode_variant_map(fields: std::collections::HashMap<String, OwnedValue>) -> OptionBlob {
    fields
        .into_iter()
        .filter_map(|(k, v)| {
            let bytes = match v.downcast_ref::<str>() {
                Ok(s) => s.as_bytes().to_vec(),
                Err(_) => match <Vec<u8>>::try_from(v) {
                    Ok(b) => b,
                    Err(_) => return None,
                },
            };
            Some((k, bytes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_variant_map_preserves_string_values() {
        let mut fields = std::collections::HashMap::new();
        fields.insert(
            "reason".to_string(),
            OwnedValue::try_from("BOUND").unwrap(),
        );
        let blob = decode_variant_map(fields);
        assert_eq!(blob.get("reason").map(|v| v.as_slice()), Some(b"BOUND".as_slice()));
    }
}
