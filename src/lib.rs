//! # sigchain
//!
//! Cryptographically linked, signed block chains over compact JWS tokens
//! (ES256 / ECDSA P-256). Three chain types share one substrate:
//!
//! - [`BlockChain`] — a generic ordered, hash-linked, signed ledger of
//!   arbitrary JSON payloads.
//! - [`IdentityChain`] — the key-rotation history of a single identity:
//!   every block advertises the thumbprint of the key allowed to sign the
//!   next one.
//! - [`AuthChain`] — authorization policy over a named resource: viral
//!   (delegable) grants, direct grants, and revocations, validated against
//!   each creator's identity chain.
//!
//! A chain serializes to a JSON array of compact JWS strings and validates
//! against a known genesis hash; any tampering with payloads, ordering, or
//! signatures surfaces as a [`Error::ChainValidation`].
//!
//! ## Quick start
//!
//! ```rust
//! use sigchain::{AuthChain, Chain, Context, Grant, GrantType, Identity, IdentityChain};
//!
//! # fn main() -> sigchain::Result<()> {
//! let ctx = Context::new();
//!
//! // Alice mints a key and publishes her identity chain.
//! let alice = Identity::new("acct:alice@example.com", ctx.new_key()?)?;
//! let idchain = IdentityChain::new(&alice, alice.acct())?;
//! ctx.chains().add(Chain::Identity(idchain))?;
//!
//! // She creates an authorization chain for a resource and grants herself
//! // a delegable privilege.
//! let mut chain = AuthChain::new(&alice, "xmpp:teamroom@conference.example.com");
//! chain[0].add_grant(Grant::new(
//!     GrantType::ViralGrant,
//!     "participant",
//!     alice.acct(),
//!     alice.thumbprint()?,
//! ));
//!
//! // Consumers validate against the genesis hash they learned out of band.
//! let genesis_hash = chain.genesis_hash()?;
//! let serialized = chain.serialize()?;
//!
//! let mut replica = AuthChain::deserialize(&serialized)?;
//! replica.validate(&genesis_hash, &ctx)?;
//! assert!(replica.has_privilege(alice.acct(), "participant"));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod authchain;
pub mod blockchain;
pub mod chain;
pub mod chainstore;
pub mod error;
pub mod identity;
pub mod identitychain;
pub mod jwk;
pub mod jws;
pub mod keystore;
pub mod transport;

pub use authchain::{AuthChain, Grant, GrantType};
pub use blockchain::{Block, BlockChain, BlockKind, ChainView};
pub use chain::Chain;
pub use chainstore::{ChainStore, LocalChainStore, RemoteChainStore};
pub use error::{Error, Result};
pub use identity::{Identity, OrderedKeySet};
pub use identitychain::IdentityChain;
pub use jwk::{Jwk, JwkSet};
pub use keystore::{KeyStore, LocalKeyStore, RemoteKeyStore};

/// The stores every key- and chain-resolving operation runs against.
///
/// The context replaces process-wide store singletons: build one at startup
/// — local for self-contained use, [`with_server`](Context::with_server) for
/// a remote block server — and thread it through verification, validation,
/// and policy lookups. Stores use interior mutability, so a shared `&Context`
/// is all callers need.
pub struct Context {
    keys: Box<dyn KeyStore>,
    chains: Box<dyn ChainStore>,
}

impl Context {
    /// A context over in-memory stores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Box::new(LocalKeyStore::new()),
            chains: Box::new(LocalChainStore::new()),
        }
    }

    /// A context over custom stores.
    #[must_use]
    pub fn with_stores(keys: Box<dyn KeyStore>, chains: Box<dyn ChainStore>) -> Self {
        Self { keys, chains }
    }

    /// A context resolving keys and chains through a remote server:
    /// keys at `<url>/keys`, blocks and chains under `<url>`.
    pub fn with_server(url: &str) -> Result<Self> {
        Ok(Self {
            keys: Box::new(RemoteKeyStore::new(format!("{url}/keys"))?),
            chains: Box::new(RemoteChainStore::new(url)?),
        })
    }

    /// The key store.
    #[must_use]
    pub fn keys(&self) -> &dyn KeyStore {
        self.keys.as_ref()
    }

    /// The chain store.
    #[must_use]
    pub fn chains(&self) -> &dyn ChainStore {
        self.chains.as_ref()
    }

    /// Generate a P-256 keypair and register it in the key store, so blocks
    /// signed with it verify through this context.
    pub fn new_key(&self) -> Result<Jwk> {
        let key = Jwk::generate()?;
        self.keys.add(key.clone())?;
        Ok(key)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
