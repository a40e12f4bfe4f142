//! Content encryption and checksums.
//!
//! Tokens are `MAGIC || nonce || ciphertext+tag`, URL-safe base64 without
//! padding, so they can live in the same JSON string field plaintext would.

use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::VaultError;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TOKEN_MAGIC: &[u8] = b"LVENC1";

/// Process-wide content key. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    key: [u8; KEY_LEN],
}

impl SecretKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0_u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { key: bytes }
    }

    /// Parse a key from hex text; surrounding whitespace is ignored.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyMaterial`] when the text is not hex or does not
    /// decode to exactly 32 bytes.
    pub fn from_hex(raw: &str) -> Result<Self, VaultError> {
        let mut bytes = hex::decode(raw.trim())
            .map_err(|err| VaultError::KeyMaterial(format!("key must be hex encoded: {err}")))?;
        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(VaultError::KeyMaterial(format!(
                "key must decode to exactly {KEY_LEN} bytes (got {len})"
            )));
        }

        let mut key = [0_u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self { key })
    }

    /// Read the key file once at startup.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyMaterial`] when the file is missing, unreadable
    /// or malformed.
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        let mut body = fs::read_to_string(path).map_err(|err| {
            VaultError::KeyMaterial(format!("failed to read key file {}: {err}", path.display()))
        })?;
        let parsed = Self::from_hex(&body).map_err(|err| match err {
            VaultError::KeyMaterial(reason) => {
                VaultError::KeyMaterial(format!("{} ({reason})", path.display()))
            }
            other => other,
        });
        body.zeroize();
        let key = parsed?;
        tracing::debug!(path = %path.display(), "loaded content key");
        Ok(key)
    }

    /// Write this key as hex to `path` with owner-only permissions.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyMaterial`] when the file exists and `overwrite`
    /// is false, or when it cannot be written.
    pub fn write_to(&self, path: &Path, overwrite: bool) -> Result<(), VaultError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                VaultError::KeyMaterial(format!(
                    "failed to create key directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).map_err(|err| {
            VaultError::KeyMaterial(format!("failed to create key file {}: {err}", path.display()))
        })?;
        let mut body = self.to_hex();
        body.push('\n');
        let written = file.write_all(body.as_bytes()).and_then(|()| file.sync_all());
        body.zeroize();
        written.map_err(|err| {
            VaultError::KeyMaterial(format!("failed to write key file {}: {err}", path.display()))
        })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Hex form of the key. Callers should zeroize the returned string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey").field("key", &"[REDACTED]").finish()
    }
}

/// Authenticated encryption of artefact content under one [`SecretKey`].
#[derive(Clone)]
pub struct Codec {
    cipher: XChaCha20Poly1305,
}

impl Codec {
    #[must_use]
    pub fn new(key: &SecretKey) -> Self {
        Self { cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())) }
    }

    /// Encrypt `plaintext` into a printable, self-contained token.
    ///
    /// # Errors
    /// Returns [`VaultError::Encryption`] if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|err| VaultError::Encryption(err.to_string()))?;

        let mut token = Vec::with_capacity(TOKEN_MAGIC.len() + NONCE_LEN + ciphertext.len());
        token.extend_from_slice(TOKEN_MAGIC);
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Decrypt a token produced by [`Codec::encrypt`].
    ///
    /// # Errors
    /// Returns [`VaultError::Decryption`] when the token is malformed, was made
    /// under another key, or fails authentication.
    pub fn decrypt(&self, token: &str) -> Result<String, VaultError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|err| decryption_error(format!("token is not valid base64: {err}")))?;
        if bytes.len() <= TOKEN_MAGIC.len() + NONCE_LEN {
            return Err(decryption_error("token is too short".to_string()));
        }
        if !bytes.starts_with(TOKEN_MAGIC) {
            return Err(decryption_error("token is missing expected header".to_string()));
        }

        let nonce_start = TOKEN_MAGIC.len();
        let nonce_end = nonce_start + NONCE_LEN;
        let nonce = XNonce::from_slice(&bytes[nonce_start..nonce_end]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &bytes[nonce_end..])
            .map_err(|_| decryption_error("authentication failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|err| decryption_error(format!("plaintext is not UTF-8: {err}")))
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").field("cipher", &"xchacha20poly1305").finish()
    }
}

fn decryption_error(reason: String) -> VaultError {
    VaultError::Decryption { id: None, reason }
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn checksum(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Recompute the digest of `data` and compare it with `expected` exactly.
#[must_use]
pub fn verify_checksum(data: impl AsRef<[u8]>, expected: &str) -> bool {
    checksum(data) == expected
}
