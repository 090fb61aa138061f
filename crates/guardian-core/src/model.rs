//! Device registry data model
//!
//! The registry is persisted as a JSON object keyed by MAC address:
//!
//! ```json
//! {
//!   "aa:bb:cc:dd:ee:01": {
//!     "ip": "10.0.0.5",
//!     "name": "laptop",
//!     "status": "redirected",
//!     "redirect": "ads.example",
//!     "timestamp": "2025-01-09T12:00:00.000000"
//!   }
//! }
//! ```
//!
//! In memory the status is a [`DeviceStatus`] whose `Redirected` variant is
//! the only place a redirect domain can live. Fields the model does not know
//! about are carried in [`DeviceRecord::extra`] and written back unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// Name stored for devices whose hostname could not be resolved
pub const UNKNOWN_NAME: &str = "Unknown";

/// Domain used for redirected devices that carry no redirect target
pub const REDIRECT_SENTINEL: &str = "redirect.invalid";

/// Timestamp layout used in the registry file (local time, microseconds)
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Canonical MAC address: lowercase, colon-separated
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse a MAC address in `aa:bb:..`, `AA-BB-..` or bare 12-digit form
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();

        let groups: Vec<&str> = if trimmed.contains([':', '-']) {
            trimmed.split([':', '-']).collect()
        } else if trimmed.len() == 12 && trimmed.is_ascii() {
            (0..6).map(|i| &trimmed[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(Error::invalid_input(format!("Invalid MAC address: '{}'", input)));
        };

        let well_formed = groups.len() == 6
            && groups
                .iter()
                .all(|g| g.len() == 2 && g.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return Err(Error::invalid_input(format!("Invalid MAC address: '{}'", input)));
        }

        Ok(Self(groups.join(":").to_ascii_lowercase()))
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MacAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Authorization state of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Awaiting an operator decision
    Pending,
    /// Allowed on both enforcement surfaces
    Approved,
    /// Blocked on the firewall and refused by the resolver
    Blocked,
    /// Blocked on the firewall, DNS redirected to `domain`
    Redirected {
        /// Redirect target
        domain: String,
    },
}

impl DeviceStatus {
    /// Status name as stored in the registry file
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Approved => "approved",
            DeviceStatus::Blocked => "blocked",
            DeviceStatus::Redirected { .. } => "redirected",
        }
    }

    /// Redirect target, only for redirected devices
    pub fn redirect_domain(&self) -> Option<&str> {
        match self {
            DeviceStatus::Redirected { domain } => Some(domain),
            _ => None,
        }
    }

    /// Whether the device belongs on the firewall allow list
    pub fn is_approved(&self) -> bool {
        matches!(self, DeviceStatus::Approved)
    }

    /// Parse one of the statuses that carry no payload
    ///
    /// `redirected` is rejected: it needs a target domain.
    pub fn parse_plain(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(DeviceStatus::Pending),
            "approved" => Ok(DeviceStatus::Approved),
            "blocked" => Ok(DeviceStatus::Blocked),
            "redirected" => Err(Error::invalid_input(
                "status 'redirected' requires a redirect domain",
            )),
            other => Err(Error::invalid_input(format!(
                "Unknown status '{}'. Valid: pending, approved, blocked",
                other
            ))),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Redirected { domain } => write!(f, "redirected -> {}", domain),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One device known to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordWire", into = "RecordWire")]
pub struct DeviceRecord {
    /// Last observed IP address, empty if never seen
    pub ip: String,
    /// Best-effort hostname
    pub name: String,
    /// Authorization state
    pub status: DeviceStatus,
    /// Last-modified time, as written to the registry file
    pub timestamp: Option<String>,
    /// Fields written by other tools, preserved verbatim
    pub extra: Map<String, Value>,
}

impl DeviceRecord {
    /// Create a freshly discovered record, stamped with the current time
    pub fn discovered(ip: impl Into<String>, name: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            ip: ip.into(),
            name: name.into(),
            status,
            timestamp: Some(now_timestamp()),
            extra: Map::new(),
        }
    }

    /// Refresh the last-modified timestamp
    pub fn touch(&mut self) {
        self.timestamp = Some(now_timestamp());
    }

    /// The IP address if one has been observed
    pub fn observed_ip(&self) -> Option<&str> {
        let ip = self.ip.trim();
        (!ip.is_empty()).then_some(ip)
    }
}

/// On-disk shape of a record
#[derive(Serialize, Deserialize)]
struct RecordWire {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RecordWire> for DeviceRecord {
    fn from(wire: RecordWire) -> Self {
        let status = match wire.status.as_deref().unwrap_or("pending") {
            "pending" => DeviceStatus::Pending,
            "approved" => DeviceStatus::Approved,
            "blocked" => DeviceStatus::Blocked,
            "redirected" => {
                let domain = wire
                    .redirect
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| {
                        warn!("Redirected device has no redirect target, using {}", REDIRECT_SENTINEL);
                        REDIRECT_SENTINEL.to_string()
                    });
                DeviceStatus::Redirected { domain }
            }
            other => {
                warn!("Unknown device status '{}', treating as pending", other);
                DeviceStatus::Pending
            }
        };

        Self {
            ip: wire.ip.unwrap_or_default(),
            name: wire.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            status,
            timestamp: wire.timestamp,
            extra: wire.extra,
        }
    }
}

impl From<DeviceRecord> for RecordWire {
    fn from(record: DeviceRecord) -> Self {
        Self {
            redirect: record.status.redirect_domain().map(str::to_string),
            status: Some(record.status.as_str().to_string()),
            ip: Some(record.ip),
            name: Some(record.name),
            timestamp: record.timestamp,
            extra: record.extra,
        }
    }
}

/// The authoritative collection of device records, ordered by MAC
///
/// Keys are canonical lowercase MACs; files are rewritten in MAC order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Registry {
    devices: BTreeMap<MacAddress, DeviceRecord>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the persisted JSON form
    ///
    /// Keys are normalized with [`MacAddress::parse`]. Two keys naming the
    /// same device (e.g. `AA:..` and `aa:..`) are rejected rather than
    /// letting one record silently replace the other.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, DeviceRecord> = serde_json::from_str(content)?;

        let mut devices = BTreeMap::new();
        for (key, record) in raw {
            let mac = MacAddress::parse(&key)
                .map_err(|e| Error::persistence(format!("Invalid registry key '{}': {}", key, e)))?;
            if devices.contains_key(&mac) {
                return Err(Error::persistence(format!(
                    "Registry lists device {} more than once (key '{}')",
                    mac, key
                )));
            }
            devices.insert(mac, record);
        }

        Ok(Self { devices })
    }

    /// Render the persisted JSON form (two-space indentation, trailing newline)
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Whether `mac` is known
    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.devices.contains_key(mac)
    }

    /// Look up a device
    pub fn get(&self, mac: &MacAddress) -> Option<&DeviceRecord> {
        self.devices.get(mac)
    }

    /// Look up a device for mutation
    pub fn get_mut(&mut self, mac: &MacAddress) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(mac)
    }

    /// Insert or replace a device
    pub fn insert(&mut self, mac: MacAddress, record: DeviceRecord) -> Option<DeviceRecord> {
        self.devices.insert(mac, record)
    }

    /// Iterate over devices in MAC order
    pub fn iter(&self) -> impl Iterator<Item = (&MacAddress, &DeviceRecord)> {
        self.devices.iter()
    }
}

/// Current local time in the registry timestamp layout
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
