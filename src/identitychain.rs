//! Identity chains: the key-rotation history of a single identity.
//!
//! Every block carries a `pkt` claim naming the key allowed to sign the
//! *next* block. The genesis block is self-signed — its `pkt` names its own
//! signer — so block 0 and block 1 are signed with the same key.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde_json::{Map, Value};

use crate::blockchain::{
    self, Block, BlockKind, ChainView, Ratchet,
};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::jwk::Jwk;
use crate::jws;
use crate::Context;

/// Chain type id embedded in identity-chain genesis blocks.
pub const CHAIN_TYPEID: &str = "identity_XXX";

/// A chain expressing the key-rotation ordering of one identity.
#[derive(Debug, Clone)]
pub struct IdentityChain {
    blocks: Vec<Block>,
    // pkt -> insertion index; the partial order behind is_same_or_subsequent.
    pkt_order: HashMap<String, usize>,
}

impl IdentityChain {
    /// Create a chain for `identity` with a self-signed genesis block whose
    /// `pkt` is the thumbprint of the currently active key.
    pub fn new(identity: &Identity, subject: &str) -> Result<Self> {
        let mut chain = Self {
            blocks: Vec::new(),
            pkt_order: HashMap::new(),
        };
        chain.append(genesis_block(identity, subject)?)?;
        Ok(chain)
    }

    /// Build the chain encoding an identity's full rotation history
    /// `[k0, k1, …, kn]`: block `i` advertises `pkt = thumbprint(k_i)` and is
    /// signed with `k_{i-1}` (block 0 with `k0`).
    ///
    /// Leaves `identity` with `k_{n-1}` active for n > 0.
    pub fn from_identity(identity: &mut Identity, subject: &str) -> Result<Self> {
        let keys: Vec<Jwk> = identity.keys().iter().cloned().collect();
        if keys.is_empty() {
            return Err(Error::Value("identity has no key history".into()));
        }

        identity.rotate_key(keys[0].clone())?;
        let mut chain = Self::new(identity, subject)?;

        for i in 1..keys.len() {
            let pkt = keys[i].thumbprint()?;
            identity.rotate_key(keys[i - 1].clone())?;
            chain.add_block(identity, &pkt)?;
        }
        Ok(chain)
    }

    /// Append a rotation block advertising `pkt` as the next signing key.
    ///
    /// The block is signed with the identity's currently active key, which
    /// per the chain invariant must be the key the previous block's `pkt`
    /// names.
    pub fn add_block(&mut self, identity: &Identity, pkt: &str) -> Result<&Block> {
        let antecedent = blockchain::tail_hash(&mut self.blocks)?
            .ok_or_else(|| Error::Value("chain has no genesis block".into()))?;
        self.append(normal_block(identity, &antecedent, pkt))?;
        Ok(self.blocks.last().expect("just appended"))
    }

    fn append(&mut self, block: Block) -> Result<()> {
        let pkt = block
            .pkt()
            .ok_or_else(|| Error::Value("identity block has no pkt".into()))?
            .to_string();
        let index = self.pkt_order.len();
        self.pkt_order.insert(pkt, index);
        self.blocks.push(block);
        Ok(())
    }

    /// The chain subject from the genesis block.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.blocks.first().and_then(Block::subject)
    }

    /// The chain creator from the genesis block.
    #[must_use]
    pub fn creator(&self) -> Option<&str> {
        self.blocks.first().map(Block::creator)
    }

    /// Whether `tp1` appears no earlier than `tp2` in the rotation order.
    ///
    /// # Errors
    /// `Error::ChainValidation` if either thumbprint never appeared as a
    /// `pkt` in this chain.
    pub fn is_same_or_subsequent(&self, tp1: &str, tp2: &str) -> Result<bool> {
        let o1 = self.pkt_index(tp1)?;
        let o2 = self.pkt_index(tp2)?;
        Ok(o1 >= o2)
    }

    fn pkt_index(&self, thumbprint: &str) -> Result<usize> {
        self.pkt_order
            .get(thumbprint)
            .copied()
            .ok_or_else(|| Error::ChainValidation(format!("Unknown signing key: {thumbprint}")))
    }

    /// Seal and hash the genesis block.
    pub fn genesis_hash(&mut self) -> Result<String> {
        let block = self
            .blocks
            .first_mut()
            .ok_or_else(|| Error::Value("chain has no genesis block".into()))?;
        block.serialize()?;
        block.hash()
    }

    /// Serialize to a JSON array of compact JWS strings.
    pub fn serialize(&mut self) -> Result<String> {
        blockchain::serialize_blocks(&mut self.blocks)
    }

    /// Rehydrate an identity chain. Non-genesis blocks have no `iss` on the
    /// wire; their creator is taken from the genesis block.
    pub fn deserialize(data: &str) -> Result<Self> {
        let tokens = blockchain::parse_tokens(data)?;
        let mut chain = Self {
            blocks: Vec::new(),
            pkt_order: HashMap::new(),
        };
        let Some(first) = tokens.first() else {
            return Ok(chain);
        };

        let genesis = Block::from_token(first, BlockKind::IdentityGenesis, None)?;
        let creator = genesis.creator().to_string();
        let tid = genesis.tid().map(str::to_string);
        let subject = genesis.subject().map(str::to_string);
        chain.append(genesis)?;

        let view = ChainView {
            creator: &creator,
            tid: tid.as_deref(),
            subject: subject.as_deref(),
        };
        for token in &tokens[1..] {
            chain.append(Block::from_token(token, BlockKind::Identity, Some(&view))?)?;
        }
        Ok(chain)
    }

    /// Validate against a known genesis hash: hash linkage, and every block
    /// signed by the key its antecedent's `pkt` authorized.
    pub fn validate(&mut self, genesis_hash: &str, ctx: &Context) -> Result<()> {
        blockchain::validate_blocks(&mut self.blocks, genesis_hash, Ratchet::identity(), ctx)
    }

    /// JSON form of every block, in chain order.
    #[must_use]
    pub fn to_json(&self) -> Vec<Map<String, Value>> {
        self.blocks.iter().map(Block::to_json).collect()
    }
}

impl Deref for IdentityChain {
    type Target = [Block];

    fn deref(&self) -> &[Block] {
        &self.blocks
    }
}

impl DerefMut for IdentityChain {
    fn deref_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }
}

impl fmt::Display for IdentityChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        blockchain::display_blocks(&self.blocks, f)
    }
}

fn genesis_block(identity: &Identity, subject: &str) -> Result<Block> {
    let mut block = Block::with_kind(BlockKind::IdentityGenesis, identity, None, Map::new());
    let pkt = identity.thumbprint()?;
    let payload = block.payload_mut();
    payload.insert("pkt".to_string(), Value::String(pkt));
    payload.insert("tid".to_string(), Value::String(CHAIN_TYPEID.to_string()));
    payload.insert("sub".to_string(), Value::String(subject.to_string()));
    Ok(block)
}

fn normal_block(identity: &Identity, antecedent: &str, pkt: &str) -> Block {
    let mut block = Block::with_kind(BlockKind::Identity, identity, Some(antecedent), Map::new());
    block
        .payload_mut()
        .insert("pkt".to_string(), Value::String(pkt.to_string()));
    block
}

/// Signature rule for identity-chain blocks: the signer must be the key the
/// antecedent block's `pkt` names. The genesis block bootstraps the ratchet
/// with itself, making it self-signed by construction.
pub(crate) fn validate_signature(block: &Block, ratchet: &mut Ratchet, ctx: &Context) -> Result<()> {
    if ratchet.antecedent_hash().is_none() {
        ratchet.advance(block)?;
    }

    let kid = block.kid()?;
    if ratchet.antecedent_pkt() == Some(kid.as_str()) {
        let key = ctx.keys().get(&kid)?;
        jws::verify(block.token()?, &key)
    } else {
        // Key recovery and issuer tombstones would land here.
        Err(Error::NotImplemented(
            "block signed by a key other than the antecedent pkt".into(),
        ))
    }
}
