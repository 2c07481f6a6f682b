//! The chain type factory and the heterogeneous [`Chain`] enum.

use std::fmt;

use serde_json::Value;

use crate::authchain::{self, AuthChain};
use crate::blockchain::{self, BlockChain};
use crate::error::Result;
use crate::identitychain::{self, IdentityChain};
use crate::jws;
use crate::Context;

/// A chain of any registered type. This is what chain stores hold and what
/// factory-driven deserialization returns.
#[derive(Debug, Clone)]
pub enum Chain {
    /// A generic block chain.
    Block(BlockChain),
    /// An identity (key rotation) chain.
    Identity(IdentityChain),
    /// An authorization chain.
    Auth(AuthChain),
}

type Deserializer = fn(&str) -> Result<Chain>;

/// Registry from genesis `tid` to the subtype deserializer.
fn registry(tid: &str) -> Option<Deserializer> {
    match tid {
        identitychain::CHAIN_TYPEID => {
            Some(|data| IdentityChain::deserialize(data).map(Chain::Identity))
        }
        authchain::CHAIN_TYPEID => Some(|data| AuthChain::deserialize(data).map(Chain::Auth)),
        _ => None,
    }
}

impl Chain {
    /// Deserialize a chain, dispatching on the genesis block's `tid` tag.
    ///
    /// An empty array, or a genesis without a registered `tid`, yields a
    /// generic [`BlockChain`].
    pub fn deserialize(data: &str) -> Result<Self> {
        let tokens = blockchain::parse_tokens(data)?;
        if let Some(first) = tokens.first() {
            let (_, payload) = jws::decode(first)?;
            if let Some(tid) = payload.get("tid").and_then(Value::as_str) {
                if let Some(deserialize) = registry(tid) {
                    return deserialize(data);
                }
            }
        }
        Ok(Self::Block(BlockChain::deserialize(data)?))
    }

    /// The chain subject: the genesis block's `sub` claim.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Block(c) => c.subject(),
            Self::Identity(c) => c.subject(),
            Self::Auth(c) => c.subject(),
        }
    }

    /// Number of blocks in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Block(c) => c.len(),
            Self::Identity(c) => c.len(),
            Self::Auth(c) => c.len(),
        }
    }

    /// Whether the chain has no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to a JSON array of compact JWS strings.
    pub fn serialize(&mut self) -> Result<String> {
        match self {
            Self::Block(c) => c.serialize(),
            Self::Identity(c) => c.serialize(),
            Self::Auth(c) => c.serialize(),
        }
    }

    /// Seal every block and return the compact JWS tokens in chain order.
    pub fn tokens(&mut self) -> Result<Vec<String>> {
        match self {
            Self::Block(c) => blockchain::block_tokens(c),
            Self::Identity(c) => blockchain::block_tokens(c),
            Self::Auth(c) => blockchain::block_tokens(c),
        }
    }

    /// Validate against a known genesis hash with the chain-type-specific
    /// rules.
    pub fn validate(&mut self, genesis_hash: &str, ctx: &Context) -> Result<()> {
        match self {
            Self::Block(c) => c.validate(genesis_hash, ctx),
            Self::Identity(c) => c.validate(genesis_hash, ctx),
            Self::Auth(c) => c.validate(genesis_hash, ctx),
        }
    }

    /// Borrow as an identity chain, if that is what this is.
    #[must_use]
    pub fn as_identity(&self) -> Option<&IdentityChain> {
        match self {
            Self::Identity(c) => Some(c),
            _ => None,
        }
    }

    /// Borrow as an authorization chain, if that is what this is.
    #[must_use]
    pub fn as_auth(&self) -> Option<&AuthChain> {
        match self {
            Self::Auth(c) => Some(c),
            _ => None,
        }
    }

    /// Borrow as a generic block chain, if that is what this is.
    #[must_use]
    pub fn as_block(&self) -> Option<&BlockChain> {
        match self {
            Self::Block(c) => Some(c),
            _ => None,
        }
    }
}

impl From<BlockChain> for Chain {
    fn from(chain: BlockChain) -> Self {
        Self::Block(chain)
    }
}

impl From<IdentityChain> for Chain {
    fn from(chain: IdentityChain) -> Self {
        Self::Identity(chain)
    }
}

impl From<AuthChain> for Chain {
    fn from(chain: AuthChain) -> Self {
        Self::Auth(chain)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(c) => fmt::Display::fmt(c, f),
            Self::Identity(c) => fmt::Display::fmt(c, f),
            Self::Auth(c) => fmt::Display::fmt(c, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use serde_json::{json, Map};

    #[test]
    fn test_factory_dispatches_on_tid() {
        let ctx = Context::new();
        let ident = Identity::new("acct:anton", ctx.new_key().unwrap()).unwrap();

        // A plain chain, even one with pkt-looking payloads, stays generic.
        let mut bchain = BlockChain::new();
        bchain.add_block(&ident, Map::new()).unwrap();
        bchain.add_block(&ident, Map::new()).unwrap();
        bchain
            .add_block(&ident, json!({"pkt": "not-an-identity-chain"}).as_object().unwrap().clone())
            .unwrap();
        let chain = Chain::deserialize(&bchain.serialize().unwrap()).unwrap();
        assert!(chain.as_block().is_some());
        assert!(chain.as_identity().is_none());

        let mut ichain = IdentityChain::new(&ident, ident.acct()).unwrap();
        let chain = Chain::deserialize(&ichain.serialize().unwrap()).unwrap();
        assert!(chain.as_identity().is_some());
        assert!(chain.as_block().is_none());

        let mut achain = AuthChain::new(&ident, "RESOURCE");
        let chain = Chain::deserialize(&achain.serialize().unwrap()).unwrap();
        assert!(chain.as_auth().is_some());
        assert_eq!(chain.subject().unwrap(), "RESOURCE");
    }

    #[test]
    fn test_empty_serialization_is_a_generic_chain() {
        let mut chain = Chain::deserialize("[]").unwrap();
        assert!(chain.is_empty());
        assert!(chain.as_block().is_some());
        assert_eq!(chain.serialize().unwrap(), "[]");
    }

    #[test]
    fn test_identity_round_trip_validates() {
        let ctx = Context::new();
        let mut ident = Identity::new("acct:anton", ctx.new_key().unwrap()).unwrap();
        ident.rotate_key(ctx.new_key().unwrap()).unwrap();
        let mut ichain = IdentityChain::from_identity(&mut ident, "subject").unwrap();
        let genesis_hash = ichain.genesis_hash().unwrap();

        let mut chain = Chain::deserialize(&ichain.serialize().unwrap()).unwrap();
        chain.validate(&genesis_hash, &ctx).unwrap();
    }
}
