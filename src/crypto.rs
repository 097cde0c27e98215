//! At-rest sealing for stored OAuth tokens.
//!
//! Tokens are sealed with AES-256-GCM into a small JSON envelope when a key is
//! configured. Values that do not parse as an envelope are treated as
//! plaintext so rows written without a key stay readable.

use std::fmt::{Debug, Formatter};

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOKEN_KEY_ENV: &str = "MAILSYNC_TOKEN_KEY";
const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("MAILSYNC_TOKEN_KEY must be 64 hex characters (32 bytes): {0}")]
    InvalidKey(String),

    #[error("seal token: {0}")]
    Seal(&'static str),

    #[error("open sealed token: {0}")]
    Open(String),

    #[error("token envelope json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEnvelope {
    version: u8,
    nonce_hex: String,
    ciphertext_hex: String,
}

#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; KEY_BYTES],
}

impl Debug for TokenCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}

impl TokenCipher {
    pub fn from_hex(raw: &str) -> Result<Self, CryptoError> {
        let decoded = hex_decode(raw).map_err(CryptoError::InvalidKey)?;
        let key: [u8; KEY_BYTES] = decoded
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes".to_string()))?;
        Ok(Self { key })
    }

    pub fn from_env() -> Result<Option<Self>, CryptoError> {
        std::env::var(TOKEN_KEY_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| Self::from_hex(&value))
            .transpose()
    }

    fn aead_key(&self) -> Result<LessSafeKey, &'static str> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| "construct AES-256-GCM key")?;
        Ok(LessSafeKey::new(unbound))
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let key = self.aead_key().map_err(CryptoError::Seal)?;

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Seal("generate random nonce"))?;

        let mut buffer = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut buffer,
        )
        .map_err(|_| CryptoError::Seal("encrypt token"))?;

        let envelope = SealedEnvelope {
            version: ENVELOPE_VERSION,
            nonce_hex: hex_encode(&nonce_bytes),
            ciphertext_hex: hex_encode(&buffer),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Open a stored value. Non-envelope input is returned unchanged.
    pub fn open(&self, stored: &str) -> Result<String, CryptoError> {
        let Ok(envelope) = serde_json::from_str::<SealedEnvelope>(stored) else {
            return Ok(stored.to_string());
        };

        if envelope.version != ENVELOPE_VERSION {
            return Err(CryptoError::Open(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }

        let nonce_bytes: [u8; NONCE_BYTES] = hex_decode(&envelope.nonce_hex)
            .map_err(CryptoError::Open)?
            .try_into()
            .map_err(|_| CryptoError::Open("invalid nonce length".to_string()))?;
        let mut ciphertext = hex_decode(&envelope.ciphertext_hex).map_err(CryptoError::Open)?;

        let key = self
            .aead_key()
            .map_err(|e| CryptoError::Open(e.to_string()))?;
        let plaintext = key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut ciphertext,
            )
            .map_err(|_| CryptoError::Open("authentication failed".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::Open("token is not utf-8".to_string()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, String> {
    let value = raw.trim();
    if value.len() % 2 != 0 {
        return Err("hex string length must be even".to_string());
    }

    value
        .as_bytes()
        .chunks(2)
        .map(|pair| match (hex_nibble(pair[0]), hex_nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err("invalid hex digit".to_string()),
        })
        .collect()
}

fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
