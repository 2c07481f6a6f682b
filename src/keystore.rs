//! Key stores: thumbprint → JWK resolution, local and remote.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::jwk::Jwk;
use crate::transport::{HttpTransport, Transport};

/// Resolver interface from key thumbprints to JWKs.
pub trait KeyStore: Send + Sync {
    /// Store a key, indexed by its thumbprint. Overwrite is permitted.
    /// Returns the thumbprint.
    fn add(&self, key: Jwk) -> Result<String>;

    /// Resolve a thumbprint to a key.
    fn get(&self, thumbprint: &str) -> Result<Jwk>;

    /// Whether the thumbprint resolves without hitting a remote server.
    fn contains(&self, thumbprint: &str) -> bool;

    /// Publish a key. For a local store this is the same as [`add`](Self::add).
    fn upload(&self, key: &Jwk) -> Result<String> {
        self.add(key.clone())
    }
}

/// In-memory key store.
#[derive(Debug, Default)]
pub struct LocalKeyStore {
    keys: RwLock<HashMap<String, Jwk>>,
}

impl LocalKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for LocalKeyStore {
    fn add(&self, key: Jwk) -> Result<String> {
        let thumbprint = key.thumbprint()?;
        self.keys.write().unwrap().insert(thumbprint.clone(), key);
        Ok(thumbprint)
    }

    fn get(&self, thumbprint: &str) -> Result<Jwk> {
        self.keys
            .read()
            .unwrap()
            .get(thumbprint)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(thumbprint.to_string()))
    }

    fn contains(&self, thumbprint: &str) -> bool {
        self.keys.read().unwrap().contains_key(thumbprint)
    }
}

/// Key store backed by a remote key server, caching through a local store.
///
/// `url` is the keys endpoint itself, e.g. `https://example.com/keys`.
pub struct RemoteKeyStore {
    url: String,
    cache: LocalKeyStore,
    transport: Box<dyn Transport>,
}

impl RemoteKeyStore {
    /// Create a store against `url` using the default HTTP transport.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_transport(url, Box::new(HttpTransport::new()?)))
    }

    /// Create a store with a custom transport.
    pub fn with_transport(url: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            url: url.into(),
            cache: LocalKeyStore::new(),
            transport,
        }
    }
}

impl KeyStore for RemoteKeyStore {
    fn add(&self, key: Jwk) -> Result<String> {
        self.cache.add(key)
    }

    fn get(&self, thumbprint: &str) -> Result<Jwk> {
        if let Ok(key) = self.cache.get(thumbprint) {
            return Ok(key);
        }

        let url = format!("{}/{}", self.url, thumbprint);
        let resp = self.transport.get(&url)?;
        if resp.status != 200 {
            tracing::error!(status = resp.status, %url, "key fetch failed");
            return Err(Error::KeyNotFound(thumbprint.to_string()));
        }

        let key = Jwk::from_json(&resp.body)?;
        self.cache.add(key.clone())?;
        Ok(key)
    }

    fn contains(&self, thumbprint: &str) -> bool {
        self.cache.contains(thumbprint)
    }

    /// POST the public JWK to the server, expecting a 201 whose echoed `kid`
    /// matches the local thumbprint, then cache the key.
    fn upload(&self, key: &Jwk) -> Result<String> {
        let thumbprint = key.thumbprint()?;
        let body = serde_json::to_string(&key.public())?;
        let resp = self.transport.post(&self.url, "application/json", body)?;

        if resp.status != 201 {
            tracing::error!(status = resp.status, url = %self.url, "key upload failed");
            return Err(Error::Request(format!("HTTP {} from {}", resp.status, self.url)));
        }

        let echoed: Value = serde_json::from_str(&resp.body)
            .map_err(|_| Error::InvalidFormat("invalid upload response body".into()))?;
        if echoed.get("kid").and_then(Value::as_str) != Some(thumbprint.as_str()) {
            return Err(Error::Value("'kid' changed on upload".into()));
        }

        tracing::debug!(kid = %thumbprint, "uploaded key");
        self.cache.add(key.clone())?;
        Ok(thumbprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;
    use std::sync::Arc;

    struct SharedTransport(Arc<ScriptedTransport>);

    impl Transport for SharedTransport {
        fn get(&self, url: &str) -> Result<crate::transport::Response> {
            self.0.get(url)
        }
        fn post(&self, url: &str, content_type: &str, body: String) -> Result<crate::transport::Response> {
            self.0.post(url, content_type, body)
        }
    }

    fn remote() -> (RemoteKeyStore, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let store = RemoteKeyStore::with_transport(
            "http://keystore.com/keys",
            Box::new(SharedTransport(Arc::clone(&transport))),
        );
        (store, transport)
    }

    #[test]
    fn test_local_store() {
        let store = LocalKeyStore::new();
        let k1 = Jwk::generate().unwrap();
        let k2 = Jwk::generate().unwrap();
        let tp1 = k1.thumbprint().unwrap();
        let tp2 = k2.thumbprint().unwrap();

        store.add(k1.clone()).unwrap();
        assert_eq!(store.get(&tp1).unwrap(), k1);
        assert!(matches!(store.get(&tp2), Err(Error::KeyNotFound(_))));

        store.add(k2.clone()).unwrap();
        assert_eq!(store.get(&tp2).unwrap(), k2);
        assert!(store.contains(&tp1));
        assert!(store.contains(&tp2));
        assert!(!store.contains("missing"));
    }

    #[test]
    fn test_local_upload_is_add() {
        let store = LocalKeyStore::new();
        let key = Jwk::generate().unwrap();
        let tp = store.upload(&key).unwrap();
        assert_eq!(store.get(&tp).unwrap(), key);
    }

    #[test]
    fn test_remote_get_cached_keys_without_requests() {
        let (store, transport) = remote();
        let keys: Vec<Jwk> = (0..10).map(|_| Jwk::generate().unwrap()).collect();
        for k in &keys {
            store.add(k.clone()).unwrap();
        }

        for k in &keys {
            assert_eq!(&store.get(&k.thumbprint().unwrap()).unwrap(), k);
        }
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_remote_get_fetches_and_caches() {
        let (store, transport) = remote();
        let key = Jwk::generate().unwrap();
        let tp = key.thumbprint().unwrap();
        transport.push_response(200, serde_json::to_string(&key.public()).unwrap());

        let fetched = store.get(&tp).unwrap();
        assert_eq!(fetched.x, key.x);
        assert_eq!(fetched.kid.as_deref().unwrap(), tp);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "GET");
        assert_eq!(calls[0].url, format!("http://keystore.com/keys/{tp}"));

        // Cached now, no further requests.
        store.get(&tp).unwrap();
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_remote_get_error_status() {
        let (store, transport) = remote();
        transport.push_response(500, "");
        assert!(matches!(store.get("missing"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_remote_upload() {
        let (store, transport) = remote();
        let key = Jwk::generate().unwrap();
        transport.push_response(201, serde_json::to_string(&key.public()).unwrap());

        let tp = store.upload(&key).unwrap();
        assert_eq!(tp, key.thumbprint().unwrap());
        assert!(store.contains(&tp));
        assert_eq!(store.get(&tp).unwrap(), key);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].url, "http://keystore.com/keys");
        assert_eq!(calls[0].content_type.as_deref(), Some("application/json"));
        // The body is the public form only.
        assert!(!calls[0].body.as_deref().unwrap().contains("\"d\""));
    }

    #[test]
    fn test_remote_upload_error_status() {
        let (store, transport) = remote();
        transport.push_response(500, "");
        let key = Jwk::generate().unwrap();
        assert!(matches!(store.upload(&key), Err(Error::Request(_))));
    }

    #[test]
    fn test_remote_upload_kid_changed() {
        let (store, transport) = remote();
        let key = Jwk::generate().unwrap();
        let mut echoed = serde_json::to_value(key.public()).unwrap();
        echoed["kid"] = Value::String("The Black Ryder".to_string());
        transport.push_response(201, echoed.to_string());

        assert!(matches!(store.upload(&key), Err(Error::Value(_))));
    }
}
