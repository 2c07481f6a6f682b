//! Compact JWS (`header.payload.signature`) over JSON object payloads.
//!
//! Tokens are always ES256-signed and carry the signing key's thumbprint as
//! the `kid` header parameter.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::jwk::Jwk;

/// The JWS protected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Signature algorithm, always `"ES256"`.
    pub alg: String,
    /// Thumbprint of the signing key.
    pub kid: String,
}

/// Sign a JSON object payload, returning the compact serialization.
pub fn sign(payload: &Map<String, Value>, key: &Jwk) -> Result<String> {
    let header = Header {
        alg: "ES256".to_string(),
        kid: key.thumbprint()?,
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = key.sign(signing_input.as_bytes())?;

    tracing::debug!(kid = %header.kid, "signed payload");
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Decode a compact JWS into its header and payload without verifying it.
pub fn decode(token: &str) -> Result<(Header, Map<String, Value>)> {
    let [header_b64, payload_b64, _] = split(token)?;

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| Error::InvalidFormat("invalid protected header encoding".into()))?;
    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|_| Error::InvalidFormat("invalid header JSON".into()))?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| Error::InvalidFormat("invalid payload encoding".into()))?;
    let payload: Map<String, Value> = serde_json::from_slice(&payload_bytes)
        .map_err(|_| Error::InvalidFormat("payload is not a JSON object".into()))?;

    Ok((header, payload))
}

/// Verify a compact JWS with the given key.
///
/// The signing input is rebuilt from the raw token parts, so verification is
/// over the exact bytes that were signed.
pub fn verify(token: &str, key: &Jwk) -> Result<()> {
    let [header_b64, payload_b64, signature_b64] = split(token)?;

    let (header, _) = decode(token)?;
    if header.alg != "ES256" {
        return Err(Error::InvalidFormat(format!(
            "unsupported algorithm: {}",
            header.alg
        )));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| Error::InvalidFormat("invalid signature encoding".into()))?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    key.verify(signing_input.as_bytes(), &signature)
}

fn split(token: &str) -> Result<[&str; 3]> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => Ok([h, p, s]),
        _ => Err(Error::InvalidFormat("invalid compact JWS format".into())),
    }
}
