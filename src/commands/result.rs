use serde::{Deserialize, Serialize};

/// One entry of the outbound result array.
///
/// The serialized shape is the wire contract with the control server: the
/// `type` tag comes first, followed by the variant fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionResult {
    #[serde(rename = "wallpaper")]
    Wallpaper { status: bool, mac_address: String },
    #[serde(rename = "software")]
    Software {
        installed_software: String,
        status: bool,
        mac_address: String,
    },
    #[serde(rename = "serialNumber")]
    SerialNumber {
        serial: String,
        status: bool,
        mac_address: String,
    },
    #[serde(rename = "command")]
    Command {
        output: String,
        status: bool,
        mac_address: String,
    },
}

impl ExecutionResult {
    pub fn status(&self) -> bool {
        match self {
            Self::Wallpaper { status, .. }
            | Self::Software { status, .. }
            | Self::SerialNumber { status, .. }
            | Self::Command { status, .. } => *status,
        }
    }
}

/// Sent instead of a result array when the inbound frame cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub success: bool,
    pub mac: String,
    pub error: String,
}

impl ErrorReport {
    pub const NOT_AN_ARRAY: &'static str = "Commands is not an array";

    pub fn new(mac: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            mac: mac.to_string(),
            error: error.into(),
        }
    }
}
