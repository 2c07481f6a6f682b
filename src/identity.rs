//! Identities: an account URI bound to an active key and its rotation history.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::jwk::{Jwk, JwkSet};

/// A set of keys that preserves insertion order, keyed by thumbprint.
///
/// Re-adding a key keeps its original position, so iteration order is the
/// order keys first entered the set — the rotation history.
#[derive(Debug, Clone, Default)]
pub struct OrderedKeySet {
    keys: IndexMap<String, Jwk>,
}

impl OrderedKeySet {
    /// Create an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key, indexed by its thumbprint. Returns the thumbprint.
    pub fn add(&mut self, key: Jwk) -> Result<String> {
        let thumbprint = key.thumbprint()?;
        self.keys.insert(thumbprint.clone(), key);
        Ok(thumbprint)
    }

    /// Look up a key by thumbprint.
    #[must_use]
    pub fn get(&self, thumbprint: &str) -> Option<&Jwk> {
        self.keys.get(thumbprint)
    }

    /// Whether a key with this thumbprint is in the set.
    #[must_use]
    pub fn contains(&self, thumbprint: &str) -> bool {
        self.keys.contains_key(thumbprint)
    }

    /// Number of keys in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over the keys in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Jwk> {
        self.keys.values()
    }

    /// Export the set as a standard JWKS document.
    #[must_use]
    pub fn export(&self) -> JwkSet {
        JwkSet {
            keys: self.keys.values().cloned().collect(),
        }
    }
}

/// Identity information for the entity identified by `acct`.
///
/// A "private" identity holds private key material and can sign blocks; a
/// "public" identity carries only a public key and an empty key set.
#[derive(Debug, Clone)]
pub struct Identity {
    acct: String,
    key: Jwk,
    keys: OrderedKeySet,
    idchain: Option<String>,
}

impl Identity {
    /// Create an identity for `acct` with `key` as its active key.
    ///
    /// The key must carry a `kid` equal to its thumbprint. A private active
    /// key is entered into the rotation history.
    pub fn new(acct: impl Into<String>, key: Jwk) -> Result<Self> {
        let Some(kid) = key.kid.as_deref() else {
            return Err(Error::Value("active key must have a key ID (kid)".into()));
        };
        if kid != key.thumbprint()? {
            return Err(Error::Value("active key 'kid' does not match its thumbprint".into()));
        }

        let mut keys = OrderedKeySet::new();
        if key.is_private() {
            keys.add(key.clone())?;
        }

        Ok(Self {
            acct: acct.into(),
            key,
            keys,
            idchain: None,
        })
    }

    /// The account URI identifying this entity.
    #[must_use]
    pub fn acct(&self) -> &str {
        &self.acct
    }

    /// The active key. Private for private identities, public otherwise.
    #[must_use]
    pub fn key(&self) -> &Jwk {
        &self.key
    }

    /// The rotation history, oldest first.
    #[must_use]
    pub fn keys(&self) -> &OrderedKeySet {
        &self.keys
    }

    /// Thumbprint of the active key.
    pub fn thumbprint(&self) -> Result<String> {
        self.key.thumbprint()
    }

    /// Make `key` the active key, appending it to the rotation history if it
    /// is not already there.
    pub fn rotate_key(&mut self, key: Jwk) -> Result<&Jwk> {
        let Some(kid) = key.kid.as_deref() else {
            return Err(Error::Value("active key must have a key ID (kid)".into()));
        };
        if kid != key.thumbprint()? {
            return Err(Error::Value("active key 'kid' does not match its thumbprint".into()));
        }

        self.keys.add(key.clone())?;
        self.key = key;
        Ok(&self.key)
    }

    /// The serialized `IdentityChain` attached to this identity, if any.
    #[must_use]
    pub fn idchain(&self) -> Option<&str> {
        self.idchain.as_deref()
    }

    /// Attach a **serialized** `IdentityChain`.
    pub fn set_idchain(&mut self, serialized: impl Into<String>) {
        self.idchain = Some(serialized.into());
    }

    /// Export as JSON. The private form includes the full rotation history
    /// with key material; the public form only the public active key.
    #[must_use]
    pub fn to_json(&self, private: bool) -> Map<String, Value> {
        let mut d = Map::new();
        d.insert("acct".to_string(), Value::String(self.acct.clone()));
        d.insert(
            "key".to_string(),
            serde_json::to_value(self.key.public()).unwrap_or(Value::Null),
        );
        if private {
            let keys: Vec<Value> = self
                .keys
                .iter()
                .map(|k| serde_json::to_value(k).unwrap_or(Value::Null))
                .collect();
            d.insert("keys".to_string(), Value::Array(keys));
        }
        if let Some(idchain) = &self.idchain {
            d.insert("id_chain".to_string(), Value::String(idchain.clone()));
        }
        d
    }

    /// Import an identity exported by [`to_json`](Self::to_json).
    ///
    /// Entries of the `keys` rotation history must hold private key material.
    pub fn from_json(data: &Value) -> Result<Self> {
        let acct = data
            .get("acct")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidFormat("identity has no acct".into()))?;
        let key_value = data
            .get("key")
            .ok_or_else(|| Error::InvalidFormat("identity has no key".into()))?;
        let key = Jwk::from_json(&key_value.to_string())?;

        let mut ident = Self::new(acct, key)?;
        if let Some(keys) = data.get("keys").and_then(Value::as_array) {
            for key_value in keys {
                let key = Jwk::from_json(&key_value.to_string())?;
                if !key.is_private() {
                    return Err(Error::Value("key set values require a private key".into()));
                }
                ident.keys.add(key)?;
            }
        }
        if let Some(idchain) = data.get("id_chain").and_then(Value::as_str) {
            ident.idchain = Some(idchain.to_string());
        }
        Ok(ident)
    }
}
