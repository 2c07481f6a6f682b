//! EC P-256 keys in JWK form: generation, thumbprints, ES256 sign/verify.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A JSON Web Key restricted to the EC P-256 type used on the wire.
///
/// The private scalar `d` is present only for private keys and is never
/// serialized when absent. `kid` holds the key's [thumbprint](Jwk::thumbprint)
/// for keys minted by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `"EC"`.
    pub kty: String,
    /// Curve name, always `"P-256"`.
    pub crv: String,
    /// X coordinate (base64url).
    pub x: String,
    /// Y coordinate (base64url).
    pub y: String,
    /// Private scalar (base64url), present on private keys only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// Key ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// JSON Web Key Set, the standard `{"keys": [...]}` export document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    /// Array of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

impl Jwk {
    /// Generate a new P-256 keypair with `kid` set to its thumbprint.
    pub fn generate() -> Result<Self> {
        let signing_key = SigningKey::random(&mut OsRng);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(Error::Crypto("generated key has no affine coordinates".into()));
        };

        let mut jwk = Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
            d: Some(URL_SAFE_NO_PAD.encode(signing_key.to_bytes())),
            kid: None,
        };
        jwk.kid = Some(jwk.thumbprint()?);
        Ok(jwk)
    }

    /// Parse a JWK from its JSON text, recomputing `kid` from the key material.
    ///
    /// Remote stores use this so an attacker-controlled `kid` can never alias
    /// a different key.
    pub fn from_json(data: &str) -> Result<Self> {
        let mut jwk: Self = serde_json::from_str(data)
            .map_err(|e| Error::InvalidFormat(format!("invalid JWK: {e}")))?;
        jwk.kid = Some(jwk.thumbprint()?);
        Ok(jwk)
    }

    /// The public form of this key: same coordinates, no private scalar.
    #[must_use]
    pub fn public(&self) -> Self {
        Self { d: None, ..self.clone() }
    }

    /// Whether this JWK holds private key material.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Compute the canonical thumbprint of this key.
    ///
    /// SHA-256 over the UTF-8 bytes of `{"crv":…,"kty":…,"x":…,"y":…}` with
    /// exactly those keys in that order and no whitespace, encoded as
    /// base64url without padding. Implementations must match byte-for-byte so
    /// thumbprints are portable across processes.
    pub fn thumbprint(&self) -> Result<String> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(Error::Value(format!(
                "only EC P-256 keys are supported, got {}/{}",
                self.kty, self.crv
            )));
        }

        // BTreeMap ordering is alphabetical, which for these four keys is the
        // required crv, kty, x, y order.
        let mut canonical = BTreeMap::new();
        canonical.insert("crv", self.crv.as_str());
        canonical.insert("kty", self.kty.as_str());
        canonical.insert("x", self.x.as_str());
        canonical.insert("y", self.y.as_str());

        let canonical_json = serde_json::to_string(&canonical)?;
        let hash = Sha256::digest(canonical_json.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(hash))
    }

    /// Sign `message` with ES256, returning the 64-byte JOSE `r || s` form.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature: Signature = self.signing_key()?.sign(message);
        Ok(signature.to_bytes().to_vec())
    }

    /// Verify an ES256 signature in JOSE `r || s` form over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        if signature.len() != 64 {
            return Err(Error::InvalidFormat("ES256 signature must be 64 bytes".into()));
        }
        let signature = Signature::from_slice(signature)
            .map_err(|_| Error::InvalidFormat("invalid signature format".into()))?;
        self.verifying_key()?
            .verify(message, &signature)
            .map_err(|_| Error::Signature)
    }

    /// Build the ECDSA signing key from the private scalar.
    pub(crate) fn signing_key(&self) -> Result<SigningKey> {
        let d = self
            .d
            .as_ref()
            .ok_or_else(|| Error::Value("key has no private material".into()))?;
        let d_bytes = URL_SAFE_NO_PAD
            .decode(d)
            .map_err(|_| Error::InvalidFormat("invalid d scalar encoding".into()))?;
        SigningKey::from_slice(&d_bytes)
            .map_err(|_| Error::Crypto("invalid P-256 private scalar".into()))
    }

    /// Build the ECDSA verifying key from the public coordinates.
    pub(crate) fn verifying_key(&self) -> Result<VerifyingKey> {
        let x_bytes = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|_| Error::InvalidFormat("invalid x coordinate".into()))?;
        let y_bytes = URL_SAFE_NO_PAD
            .decode(&self.y)
            .map_err(|_| Error::InvalidFormat("invalid y coordinate".into()))?;
        if x_bytes.len() != 32 || y_bytes.len() != 32 {
            return Err(Error::InvalidFormat("invalid coordinate length for P-256".into()));
        }

        // SEC1 uncompressed point: 0x04 || x || y
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&x_bytes);
        sec1.extend_from_slice(&y_bytes);

        VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|_| Error::Crypto("invalid public key point".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rfc7515_key() -> Jwk {
        Jwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU".to_string(),
            y: "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0".to_string(),
            d: None,
            kid: None,
        }
    }

    #[test]
    fn test_thumbprint_known_answer() {
        let tp = rfc7515_key().thumbprint().unwrap();
        assert_eq!(tp, "oKIywvGUpTVTyxMQ3bwIIeQUudfr_CkLMjCE19ECD-U");
    }

    #[test]
    fn test_thumbprint_ignores_kid_and_d() {
        let mut jwk = rfc7515_key();
        let tp = jwk.thumbprint().unwrap();

        jwk.kid = Some("something else".to_string());
        jwk.d = Some("AAAA".to_string());
        assert_eq!(jwk.thumbprint().unwrap(), tp);
    }

    #[test]
    fn test_thumbprint_differs_per_key() {
        let k1 = Jwk::generate().unwrap();
        let k2 = Jwk::generate().unwrap();
        assert_ne!(k1.thumbprint().unwrap(), k2.thumbprint().unwrap());
    }

    #[test]
    fn test_thumbprint_rejects_unsupported_key() {
        let mut jwk = rfc7515_key();
        jwk.crv = "P-384".to_string();
        assert!(matches!(jwk.thumbprint(), Err(Error::Value(_))));
    }

    #[test]
    fn test_generate_sets_kid_to_thumbprint() {
        let jwk = Jwk::generate().unwrap();
        assert!(jwk.is_private());
        assert_eq!(jwk.kid.as_deref().unwrap(), jwk.thumbprint().unwrap());
    }

    #[test]
    fn test_public_drops_private_scalar() {
        let jwk = Jwk::generate().unwrap();
        let public = jwk.public();
        assert!(!public.is_private());
        assert_eq!(public.x, jwk.x);
        assert_eq!(public.y, jwk.y);
        assert_eq!(public.kid, jwk.kid);
        assert_eq!(public.thumbprint().unwrap(), jwk.thumbprint().unwrap());
    }

    #[test]
    fn test_public_form_has_no_d_field() {
        let jwk = Jwk::generate().unwrap();
        let json = serde_json::to_value(jwk.public()).unwrap();
        assert!(json.get("d").is_none());
        assert!(json.get("x").is_some());
    }

    #[test]
    fn test_sign_and_verify() {
        let jwk = Jwk::generate().unwrap();
        let msg = b"header.payload";

        let sig = jwk.sign(msg).unwrap();
        assert_eq!(sig.len(), 64);
        jwk.verify(msg, &sig).unwrap();
        jwk.public().verify(msg, &sig).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_key_and_message() {
        let jwk = Jwk::generate().unwrap();
        let other = Jwk::generate().unwrap();
        let sig = jwk.sign(b"message").unwrap();

        assert!(matches!(other.verify(b"message", &sig), Err(Error::Signature)));
        assert!(matches!(jwk.verify(b"tampered", &sig), Err(Error::Signature)));
    }

    #[test]
    fn test_sign_requires_private_key() {
        let public = Jwk::generate().unwrap().public();
        assert!(matches!(public.sign(b"message"), Err(Error::Value(_))));
    }

    #[test]
    fn test_from_json_recomputes_kid() {
        let jwk = Jwk::generate().unwrap();
        let mut tampered = serde_json::to_value(jwk.public()).unwrap();
        tampered["kid"] = serde_json::Value::String("The Black Ryder".to_string());

        let parsed = Jwk::from_json(&tampered.to_string()).unwrap();
        assert_eq!(parsed.kid.as_deref().unwrap(), jwk.thumbprint().unwrap());
    }
}
