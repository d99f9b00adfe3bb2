//! AES-256-GCM envelopes for serializable values.
//!
//! A value is serialized to JSON, encrypted under a 256-bit key with a fresh
//! 128-bit IV, and packed with its detached 128-bit tag into a JSON envelope:
//! `{"iv": "<hex>", "data": "<hex>", "tag": "<hex>"}`. Every binary field is
//! lowercase hex; nothing else is accepted on the way back in.

use aes_gcm::{
    aead::{consts::U16, AeadCore, AeadInPlace, KeyInit, OsRng},
    aes::Aes256,
    AesGcm, Nonce, Tag,
};
use organizer_core::storage::StorageError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::key_provider::KeyMaterial;

/// IV length in bytes.
pub const IV_LEN: usize = 16;
/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 16-byte nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("authentication failed")]
    Authentication,
    #[error("encryption failed: {0}")]
    Encryption(String),
}

impl From<CipherError> for StorageError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::InvalidKey(reason) => StorageError::InvalidKey { reason },
            CipherError::Serialization(source) => StorageError::Serialization(source),
            CipherError::MalformedEnvelope(reason) => StorageError::MalformedEnvelope { reason },
            CipherError::Authentication => StorageError::Authentication,
            CipherError::Encryption(reason) => StorageError::Encryption { reason },
        }
    }
}

/// One encrypted value as it sits on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: String,
    pub data: String,
    pub tag: String,
}

impl Envelope {
    /// Parse envelope text. Only the JSON shape is checked here: all three
    /// fields must be present as strings. Field contents are checked by `open`.
    pub fn parse(text: &str) -> Result<Self, CipherError> {
        serde_json::from_str(text)
            .map_err(|e| CipherError::MalformedEnvelope(format!("not an envelope: {e}")))
    }

    pub fn to_text(&self) -> Result<String, CipherError> {
        serde_json::to_string(self).map_err(CipherError::Serialization)
    }

    fn seal<T: Serialize + ?Sized>(value: &T, key: &KeyMaterial) -> Result<Self, CipherError> {
        let cipher = build_cipher(key)?;
        let mut buffer =
            Zeroizing::new(serde_json::to_vec(value).map_err(CipherError::Serialization)?);

        let iv = Aes256Gcm16::generate_nonce(&mut OsRng);
        let tag = cipher
            .encrypt_in_place_detached(&iv, b"", buffer.as_mut_slice())
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        Ok(Self {
            iv: hex::encode(iv),
            data: hex::encode(buffer.as_slice()),
            tag: hex::encode(tag),
        })
    }

    fn open<T: DeserializeOwned>(&self, key: &KeyMaterial) -> Result<T, CipherError> {
        let iv = decode_field(&self.iv, Some(IV_LEN))?;
        let tag = decode_field(&self.tag, Some(TAG_LEN))?;
        let mut buffer = Zeroizing::new(decode_field(&self.data, None)?);

        let cipher = build_cipher(key)?;
        // The tag is checked before any plaintext is produced in the buffer.
        cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&iv),
                b"",
                buffer.as_mut_slice(),
                Tag::<U16>::from_slice(&tag),
            )
            .map_err(|_| CipherError::Authentication)?;

        serde_json::from_slice(buffer.as_slice()).map_err(CipherError::Serialization)
    }
}

/// Encrypt `value` under a hex-encoded key and return the envelope text.
pub fn encrypt<T: Serialize + ?Sized>(value: &T, key_hex: &str) -> Result<String, CipherError> {
    let key = parse_key(key_hex)?;
    encrypt_with_key(value, &key)
}

/// Decrypt envelope text under a hex-encoded key.
pub fn decrypt<T: DeserializeOwned>(envelope_text: &str, key_hex: &str) -> Result<T, CipherError> {
    let envelope = Envelope::parse(envelope_text)?;
    let key = parse_key(key_hex)?;
    envelope.open(&key)
}

pub fn encrypt_with_key<T: Serialize + ?Sized>(
    value: &T,
    key: &KeyMaterial,
) -> Result<String, CipherError> {
    Envelope::seal(value, key)?.to_text()
}

pub fn decrypt_with_key<T: DeserializeOwned>(
    envelope_text: &str,
    key: &KeyMaterial,
) -> Result<T, CipherError> {
    Envelope::parse(envelope_text)?.open(key)
}

/// Strict lowercase hex decoding.
pub(crate) fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    if let Some(pos) = text
        .bytes()
        .position(|b| !matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return Err(format!("non-lowercase-hex character at offset {pos}"));
    }
    hex::decode(text).map_err(|e| e.to_string())
}

/// Decode one field of a parsed envelope. Any edit to a field, whether it
/// breaks the hex or the length, is a failed verification and not a parse error.
fn decode_field(text: &str, expected_len: Option<usize>) -> Result<Vec<u8>, CipherError> {
    let bytes = decode_hex(text).map_err(|_| CipherError::Authentication)?;
    match expected_len {
        Some(len) if bytes.len() != len => Err(CipherError::Authentication),
        _ => Ok(bytes),
    }
}

fn parse_key(key_hex: &str) -> Result<KeyMaterial, CipherError> {
    KeyMaterial::from_hex(key_hex).map_err(|e| CipherError::InvalidKey(e.to_string()))
}

fn build_cipher(key: &KeyMaterial) -> Result<Aes256Gcm16, CipherError> {
    Aes256Gcm16::new_from_slice(key.as_bytes())
        .map_err(|e| CipherError::InvalidKey(e.to_string()))
}
