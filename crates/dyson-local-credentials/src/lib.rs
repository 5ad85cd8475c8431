//! Local MQTT credentials for dyson-local.
//!
//! The account API hands out each device's local password inside an
//! AES-256-CBC encrypted blob. The key and IV are fixed by the device
//! firmware's provisioning scheme and are the same for every device, so they
//! live here as protocol constants rather than as configuration.

pub mod error;

pub use error::{DecryptError, DecryptErrorKind};

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dyson_local_types::DeviceDescriptor;
use serde::Deserialize;
use tracing::debug;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key of the local credential blob: the bytes 1 through 32.
pub const LOCAL_CREDENTIALS_KEY: [u8; 32] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32,
];

/// CBC initialisation vector of the local credential blob.
pub const LOCAL_CREDENTIALS_IV: [u8; 16] = [0; 16];

#[derive(Deserialize)]
struct CredentialDocument {
    #[serde(rename = "apPasswordHash")]
    ap_password_hash: String,
}

/// MQTT login for one device.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Derive the login from a manifest entry: the serial is the username,
    /// the decrypted blob the password.
    pub fn from_descriptor(device: &DeviceDescriptor) -> Result<Self, DecryptError> {
        let password = decrypt_credentials(&device.local_credentials)?;
        debug!(serial = %device.serial, "derived local credentials");
        Ok(Self {
            username: device.serial.clone(),
            password,
        })
    }

    /// A login obtained some other way, e.g. from the device sticker.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decrypt a `LocalCredentials` blob and return its `apPasswordHash`.
pub fn decrypt_credentials(credentials: &str) -> Result<String, DecryptError> {
    let fail = |kind: DecryptErrorKind, decrypted: Option<String>| DecryptError {
        kind,
        credentials: credentials.to_string(),
        decrypted,
    };

    let ciphertext = BASE64
        .decode(credentials.trim())
        .map_err(|e| fail(e.into(), None))?;

    let plaintext = Aes256CbcDec::new(&LOCAL_CREDENTIALS_KEY.into(), &LOCAL_CREDENTIALS_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| {
            // Bad padding still leaves the blocks readable; keep them for
            // diagnosis. Misaligned input yields nothing.
            let partial =
                Aes256CbcDec::new(&LOCAL_CREDENTIALS_KEY.into(), &LOCAL_CREDENTIALS_IV.into())
                    .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
            fail(DecryptErrorKind::Cipher(e.to_string()), partial)
        })?;

    let text = String::from_utf8(plaintext).map_err(|e| {
        let partial = String::from_utf8_lossy(e.as_bytes()).into_owned();
        fail(DecryptErrorKind::Utf8, Some(partial))
    })?;

    let document: CredentialDocument =
        serde_json::from_str(&text).map_err(|e| fail(e.into(), Some(text.clone())))?;

    Ok(document.ap_password_hash)
}
