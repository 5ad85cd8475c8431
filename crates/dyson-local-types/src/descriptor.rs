//! Device descriptor types.

use serde::{Deserialize, Serialize};

/// A device entry from the vendor's provisioning manifest.
///
/// Field names follow the manifest's PascalCase JSON so an entry can be
/// deserialised verbatim.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceDescriptor {
    /// Device serial, e.g. "NN2-EU-KHA1234A". Doubles as the MQTT username.
    pub serial: String,
    /// Human-readable name chosen in the vendor app.
    pub name: String,
    /// Firmware version string.
    pub version: String,
    /// Base64 blob carrying the encrypted local MQTT password.
    pub local_credentials: String,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub new_version_available: bool,
    pub product_type: ProductType,
    pub connection_type: ConnectionType,
}

impl DeviceDescriptor {
    /// The mDNS hostname the device answers to on the local network.
    pub fn hostname(&self) -> String {
        format!("{}.local", self.serial)
    }
}

impl std::fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("serial", &self.serial)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("local_credentials", &"<redacted>")
            .field("auto_update", &self.auto_update)
            .field("new_version_available", &self.new_version_available)
            .field("product_type", &self.product_type)
            .field("connection_type", &self.connection_type)
            .finish()
    }
}

/// Product model code. The code prefixes every MQTT topic of the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProductType {
    /// Pure Hot+Cool Link (code `455`).
    Hp02,
    /// Pure Hot+Cool (code `527`).
    Hp04,
    /// A product code this crate has no name for.
    Other(String),
}

impl ProductType {
    /// The numeric product code as it appears on the wire.
    pub fn code(&self) -> &str {
        match self {
            Self::Hp02 => "455",
            Self::Hp04 => "527",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for ProductType {
    fn from(code: String) -> Self {
        match code.as_str() {
            "455" => Self::Hp02,
            "527" => Self::Hp04,
            _ => Self::Other(code),
        }
    }
}

impl From<ProductType> for String {
    fn from(product: ProductType) -> Self {
        product.code().to_string()
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// How the vendor cloud reaches the device. Informational only; the local
/// connection is always plain MQTT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionType {
    Wss,
    Other(String),
}

impl From<String> for ConnectionType {
    fn from(tag: String) -> Self {
        if tag == "wss" {
            Self::Wss
        } else {
            Self::Other(tag)
        }
    }
}

impl From<ConnectionType> for String {
    fn from(connection: ConnectionType) -> Self {
        match connection {
            ConnectionType::Wss => "wss".to_string(),
            ConnectionType::Other(tag) => tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_ENTRY: &str = r#"{
        "Serial": "NN2-EU-KHA1234A",
        "Name": "Bedroom",
        "Version": "21.03.08",
        "LocalCredentials": "c2VjcmV0",
        "AutoUpdate": true,
        "NewVersionAvailable": false,
        "ProductType": "527",
        "ConnectionType": "wss"
    }"#;

    #[test]
    fn parses_manifest_entry() {
        let device: DeviceDescriptor = serde_json::from_str(MANIFEST_ENTRY).unwrap();
        assert_eq!(device.serial, "NN2-EU-KHA1234A");
        assert_eq!(device.product_type, ProductType::Hp04);
        assert_eq!(device.connection_type, ConnectionType::Wss);
        assert!(device.auto_update);
        assert_eq!(device.hostname(), "NN2-EU-KHA1234A.local");
    }

    #[test]
    fn unknown_product_code_is_kept() {
        let product: ProductType = serde_json::from_str("\"438\"").unwrap();
        assert_eq!(product, ProductType::Other("438".to_string()));
        assert_eq!(product.to_string(), "438");
        assert_eq!(serde_json::to_string(&product).unwrap(), "\"438\"");
    }

    #[test]
    fn debug_hides_credentials() {
        let device: DeviceDescriptor = serde_json::from_str(MANIFEST_ENTRY).unwrap();
        let rendered = format!("{device:?}");
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn parses_toml_descriptor() {
        let toml_str = r#"
Serial = "NN2-EU-KHA1234A"
Name = "Bedroom"
Version = "21.03.08"
LocalCredentials = "c2VjcmV0"
ProductType = "455"
ConnectionType = "wss"
"#;
        let device: DeviceDescriptor = toml::from_str(toml_str).unwrap();
        assert_eq!(device.product_type, ProductType::Hp02);
        assert!(!device.new_version_available);
    }
}
