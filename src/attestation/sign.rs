//! DSSE envelope signing
//!
//! Wraps the canonical statement bytes in a DSSE envelope signed with
//! an Ed25519 key. The pre-authentication encoding and envelope layout
//! follow the DSSE v1 spec; the payload type is the in-toto media type.

use std::fs;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// DSSE payload type for in-toto statements.
pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("reading signing key: {0}")]
    Io(#[from] io::Error),

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("serializing envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A DSSE envelope over a serialized statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "payloadType")]
    pub payload_type: String,

    /// Base64 of the statement bytes.
    pub payload: String,

    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Hex SHA-256 of the verifying key bytes.
    pub keyid: String,

    /// Base64 Ed25519 signature over the pre-authentication encoding.
    pub sig: String,
}

impl Envelope {
    /// Serialize the envelope with the same canonical form as the
    /// statement itself.
    pub fn to_json(&self) -> Result<Vec<u8>, SigningError> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }
}

/// Sign canonical statement bytes with the Ed25519 key at `key_path`,
/// returning the envelope. The key file holds either the raw 32-byte
/// seed or its 64-character hex encoding.
pub fn sign_statement(statement: &[u8], key_path: &Path) -> Result<Envelope, SigningError> {
    let key = load_signing_key(key_path)?;
    let signature = key.sign(&pre_authentication_encoding(PAYLOAD_TYPE, statement));

    let keyid = hex::encode(Sha256::digest(key.verifying_key().as_bytes()));

    Ok(Envelope {
        payload_type: PAYLOAD_TYPE.to_string(),
        payload: BASE64.encode(statement),
        signatures: vec![EnvelopeSignature {
            keyid,
            sig: BASE64.encode(signature.to_bytes()),
        }],
    })
}

/// DSSE PAE: `DSSEv1 <len(type)> <type> <len(body)> <body>`.
fn pre_authentication_encoding(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut pae = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    )
    .into_bytes();
    pae.extend_from_slice(payload);
    pae
}

fn load_signing_key(path: &Path) -> Result<SigningKey, SigningError> {
    let raw = fs::read(path)?;

    // Accept a hex-encoded seed, tolerating a trailing newline.
    let bytes = match raw.len() {
        32 => raw,
        _ => {
            let text = String::from_utf8(raw)
                .map_err(|_| SigningError::InvalidKey("key is neither raw nor hex".into()))?;
            hex::decode(text.trim())
                .map_err(|e| SigningError::InvalidKey(format!("decoding hex key: {e}")))?
        }
    };

    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SigningError::InvalidKey("expected a 32-byte Ed25519 seed".into()))?;
    Ok(SigningKey::from_bytes(&seed))
}
