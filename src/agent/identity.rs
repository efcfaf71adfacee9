use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::Networks;
use tracing::{debug, info, warn};

pub const UNKNOWN_MAC: &str = "Unknown MAC Address";
const ZERO_MAC: &str = "00:00:00:00:00:00";

/// Identifies this machine to the server in every reply.
pub trait MachineIdentity: Send + Sync {
    fn mac_address(&self) -> String;
}

/// A constant identity, handy when the MAC is known up front.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub String);

impl MachineIdentity for FixedIdentity {
    fn mac_address(&self) -> String {
        self.0.clone()
    }
}

/// Lists `(interface name, hardware address)` pairs.
pub type InterfaceScan = fn() -> Vec<(String, String)>;

/// Every interface sysinfo knows about, with its MAC in `aa:bb:..` form.
pub fn scan_interfaces() -> Vec<(String, String)> {
    let networks = Networks::new_with_refreshed_list();
    networks
        .list()
        .iter()
        .map(|(name, data)| (name.clone(), data.mac_address().to_string()))
        .collect()
}

/// First non-empty, non-zero address, interfaces in name order.
pub fn first_usable_address(mut interfaces: Vec<(String, String)>) -> Option<String> {
    interfaces.sort_by(|a, b| a.0.cmp(&b.0));
    interfaces.into_iter().find_map(|(_, mac)| {
        let mac = mac.trim().to_lowercase();
        (!mac.is_empty() && mac != ZERO_MAC).then_some(mac)
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MacCache {
    mac_address: String,
}

/// Reads hardware addresses from the host and remembers the last good one.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    scan: InterfaceScan,
    cache_file: PathBuf,
}

impl HostIdentity {
    pub fn new(cache_file: impl Into<PathBuf>) -> Self {
        Self::with_scan(scan_interfaces, cache_file)
    }

    pub fn with_scan(scan: InterfaceScan, cache_file: impl Into<PathBuf>) -> Self {
        Self {
            scan,
            cache_file: cache_file.into(),
        }
    }

    pub fn live_address(&self) -> Option<String> {
        first_usable_address((self.scan)())
    }

    pub fn cached_address(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.cache_file).ok()?;
        match serde_json::from_str::<MacCache>(&raw) {
            Ok(cache) => Some(cache.mac_address),
            Err(e) => {
                warn!(path = %self.cache_file.display(), error = %e, "mac cache is corrupt");
                None
            }
        }
    }

    fn save(&self, mac: &str) -> Result<()> {
        if let Some(parent) = self.cache_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(&MacCache {
            mac_address: mac.to_string(),
        })?;
        std::fs::write(&self.cache_file, body)
            .with_context(|| format!("writing {}", self.cache_file.display()))
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }
}

impl MachineIdentity for HostIdentity {
    fn mac_address(&self) -> String {
        if let Some(mac) = self.live_address() {
            if let Err(e) = self.save(&mac) {
                warn!(error = %e, "failed to cache mac address");
            }
            debug!(%mac, "resolved mac address");
            return mac;
        }
        if let Some(mac) = self.cached_address() {
            info!(%mac, "using cached mac address");
            return mac;
        }
        warn!("no mac address available");
        UNKNOWN_MAC.to_string()
    }
}
