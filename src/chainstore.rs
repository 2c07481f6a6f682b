//! Chain stores: subject → chain resolution, local and remote.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::transport::{HttpTransport, Transport};

/// Resolver interface from chain subjects to chains.
pub trait ChainStore: Send + Sync {
    /// Store a chain under its subject. Duplicate subjects are an error.
    fn add(&self, chain: Chain) -> Result<()>;

    /// Resolve a subject to a chain.
    fn get(&self, subject: &str) -> Result<Chain>;

    /// Whether the subject resolves without hitting a remote server.
    fn contains(&self, subject: &str) -> bool;

    /// Publish a chain. For a local store this is the same as
    /// [`add`](Self::add).
    fn upload(&self, chain: Chain) -> Result<()> {
        self.add(chain)
    }
}

/// In-memory chain store.
#[derive(Debug, Default)]
pub struct LocalChainStore {
    chains: RwLock<HashMap<String, Chain>>,
}

impl LocalChainStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for LocalChainStore {
    fn add(&self, chain: Chain) -> Result<()> {
        let subject = chain
            .subject()
            .ok_or_else(|| Error::Value("chain has no subject".into()))?
            .to_string();
        let mut chains = self.chains.write().unwrap();
        if chains.contains_key(&subject) {
            return Err(Error::Value(format!("Chain {subject} already set")));
        }
        chains.insert(subject, chain);
        Ok(())
    }

    fn get(&self, subject: &str) -> Result<Chain> {
        self.chains
            .read()
            .unwrap()
            .get(subject)
            .cloned()
            .ok_or_else(|| Error::ChainNotFound(subject.to_string()))
    }

    fn contains(&self, subject: &str) -> bool {
        self.chains.read().unwrap().contains_key(subject)
    }
}

/// Chain store backed by a remote block server, caching through a local
/// store. Blocks are uploaded individually as `application/jose` documents;
/// whole chains are fetched by subject.
pub struct RemoteChainStore {
    blocks_url: String,
    chains_url: String,
    cache: LocalChainStore,
    transport: Box<dyn Transport>,
}

impl RemoteChainStore {
    /// Create a store against a server base `url` using the default HTTP
    /// transport.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self::with_transport(url, Box::new(HttpTransport::new()?)))
    }

    /// Create a store with a custom transport.
    pub fn with_transport(url: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            blocks_url: format!("{url}/blocks"),
            chains_url: format!("{url}/chains"),
            cache: LocalChainStore::new(),
            transport,
        }
    }
}

impl ChainStore for RemoteChainStore {
    fn add(&self, chain: Chain) -> Result<()> {
        self.cache.add(chain)
    }

    fn get(&self, subject: &str) -> Result<Chain> {
        if let Ok(chain) = self.cache.get(subject) {
            return Ok(chain);
        }

        let url = format!("{}/{subject}", self.chains_url);
        let resp = self.transport.get(&url)?;
        if resp.status != 200 {
            tracing::error!(status = resp.status, %url, "chain fetch failed");
            return Err(Error::ChainNotFound(subject.to_string()));
        }

        let chain = Chain::deserialize(&resp.body)?;
        self.cache.add(chain.clone())?;
        Ok(chain)
    }

    fn contains(&self, subject: &str) -> bool {
        self.cache.contains(subject)
    }

    /// POST each block's compact JWS to the server, expecting a 201 per
    /// block, then cache the chain locally.
    fn upload(&self, mut chain: Chain) -> Result<()> {
        for token in chain.tokens()? {
            let resp = self
                .transport
                .post(&self.blocks_url, "application/jose", token)?;
            if resp.status != 201 {
                tracing::error!(status = resp.status, url = %self.blocks_url, "block upload failed");
                return Err(Error::Request(format!(
                    "HTTP {} from {}",
                    resp.status, self.blocks_url
                )));
            }
        }
        self.cache.add(chain)
    }
}
