//! Splits the user payload into per-network connection profiles and the
//! stripped settings that land in the main settings file.
//!
//! Top-level network keys are treated as the first (implicit) network entry,
//! ahead of anything declared in the payload's `network` list. Ethernet
//! entries pass their `configuration` text through opaquely; WiFi entries
//! get a generated keyfile profile.

use serde_json::{Map, Value};
use std::fmt::Write;

pub const NETWORK_SETTINGS_KEYS: [&str; 6] =
    ["wifiSsid", "wifiKey", "ip", "netmask", "gateway", "routeMetric"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkProfiles {
    pub ethernet: Vec<String>,
    pub wifi: Vec<String>,
}

/// Returns the payload with all network keys stripped, plus the rendered
/// profile files.
pub fn split_network_config(payload: &Value) -> (Value, NetworkProfiles) {
    let Some(object) = payload.as_object() else {
        return (payload.clone(), NetworkProfiles::default());
    };

    let mut networks: Vec<Map<String, Value>> = Vec::new();
    let implicit: Map<String, Value> = NETWORK_SETTINGS_KEYS
        .iter()
        .filter_map(|key| object.get(*key).map(|value| (key.to_string(), value.clone())))
        .collect();
    networks.push(implicit);
    if let Some(Value::Array(declared)) = object.get("network") {
        for entry in declared {
            if let Value::Object(network) = entry {
                networks.push(network.clone());
            }
        }
    }

    let ethernet: Vec<String> = networks
        .iter()
        .filter_map(|network| field(network, "configuration"))
        .collect();
    let wifi: Vec<String> = networks
        .iter()
        .filter(|network| field(network, "wifiSsid").is_some())
        .enumerate()
        .map(|(index, network)| wifi_profile(index + 1, network))
        .collect();

    let mut stripped = object.clone();
    stripped.remove("network");
    for key in NETWORK_SETTINGS_KEYS {
        stripped.remove(key);
    }
    (Value::Object(stripped), NetworkProfiles { ethernet, wifi })
}

/// NetworkManager-style keyfile for one WiFi network. `index` is 1-based
/// within the WiFi list.
fn wifi_profile(index: usize, options: &Map<String, Value>) -> String {
    let ssid = field(options, "wifiSsid").unwrap_or_default();
    let mut profile = format!(
        "[connection]\n\
         id=wifi-{index:02}\n\
         type=wifi\n\
         \n\
         [wifi]\n\
         hidden=true\n\
         mode=infrastructure\n\
         ssid={ssid}\n\
         \n\
         [ipv4]\n"
    );
    if let Some(metric) = field(options, "routeMetric") {
        writeln!(profile, "route-metric={metric}").unwrap();
    }
    match (
        field(options, "ip"),
        field(options, "netmask"),
        field(options, "gateway"),
    ) {
        (Some(ip), Some(netmask), Some(gateway)) => {
            writeln!(profile, "method=manual").unwrap();
            writeln!(profile, "address1={ip}/{netmask},{gateway}").unwrap();
        }
        _ => {
            writeln!(profile, "method=auto").unwrap();
        }
    }
    profile.push_str("\n[ipv6]\naddr-gen-mode=stable-privacy\nmethod=auto\n");
    if let Some(key) = field(options, "wifiKey") {
        profile.push_str("\n[wifi-security]\nauth-alg=open\nkey-mgmt=wpa-psk\n");
        writeln!(profile, "psk={key}").unwrap();
    }
    profile
}

/// Field rendered as profile text; empty strings and nulls count as absent.
fn field(options: &Map<String, Value>, key: &str) -> Option<String> {
    match options.get(key)? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
