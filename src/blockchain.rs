//! Blocks and the base block chain.
//!
//! A [`Block`] is a signed, antecedent-linked JSON payload. It starts life as
//! a draft with a captured signing key and a mutable payload; the first call
//! to [`serialize`](Block::serialize) seals it into a compact JWS that is
//! cached from then on. The block hash is the SHA-256 of that cached token,
//! so tampering with the payload of a sealed block is visible to validation
//! but never rewrites history.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::authchain::{self, Grant};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::identitychain;
use crate::jwk::Jwk;
use crate::jws;
use crate::Context;

/// The role a block plays, fixed by its chain type and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// A block of a generic chain.
    Base,
    /// The genesis block of an identity chain.
    IdentityGenesis,
    /// A non-genesis identity-chain block.
    Identity,
    /// The genesis block of an authorization chain.
    AuthGenesis,
    /// A non-genesis authorization-chain block.
    Auth,
}

impl BlockKind {
    fn is_auth(self) -> bool {
        matches!(self, Self::AuthGenesis | Self::Auth)
    }

    fn is_identity(self) -> bool {
        matches!(self, Self::IdentityGenesis | Self::Identity)
    }
}

/// The intended signer of a block.
#[derive(Debug, Clone)]
enum Signer {
    /// A locally constructed block captures the creator's active key.
    Key(Jwk),
    /// A deserialized block only knows the thumbprint from the JWS header.
    Thumbprint(String),
}

/// Immutable view of chain-level facts a block needs during hydration.
#[derive(Debug, Clone, Copy)]
pub struct ChainView<'a> {
    /// Account URI of the chain creator (the genesis `iss`).
    pub creator: &'a str,
    /// Chain type id from the genesis block.
    pub tid: Option<&'a str>,
    /// Chain subject from the genesis block.
    pub subject: Option<&'a str>,
}

/// A signed, antecedent-linked payload.
#[derive(Debug, Clone)]
pub struct Block {
    kind: BlockKind,
    creator: String,
    signer: Signer,
    payload: Map<String, Value>,
    grants: Vec<Grant>,
    serialization: Option<String>,
}

impl Block {
    /// Construct a draft base block.
    ///
    /// The payload is seeded with `iss` (the creator account) and, when
    /// given, `ant`; `payload` entries never overwrite those. The identity's
    /// currently active key is captured as the signer.
    #[must_use]
    pub fn new(identity: &Identity, antecedent: Option<&str>, payload: Map<String, Value>) -> Self {
        Self::with_kind(BlockKind::Base, identity, antecedent, payload)
    }

    pub(crate) fn with_kind(
        kind: BlockKind,
        identity: &Identity,
        antecedent: Option<&str>,
        extra: Map<String, Value>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("iss".to_string(), Value::String(identity.acct().to_string()));
        if let Some(ant) = antecedent {
            payload.insert("ant".to_string(), Value::String(ant.to_string()));
        }
        for (k, v) in extra {
            if !payload.contains_key(&k) {
                payload.insert(k, v);
            }
        }

        Self {
            kind,
            creator: identity.acct().to_string(),
            signer: Signer::Key(identity.key().clone()),
            payload,
            grants: Vec::new(),
            serialization: None,
        }
    }

    /// Rehydrate a block from its compact JWS.
    ///
    /// `view` supplies chain-level facts for block types whose JSON omits
    /// them (identity-chain blocks drop `iss`).
    pub(crate) fn from_token(
        token: &str,
        kind: BlockKind,
        view: Option<&ChainView<'_>>,
    ) -> Result<Self> {
        let (header, payload) = jws::decode(token)?;

        let creator = match payload.get("iss").and_then(Value::as_str) {
            Some(iss) => iss.to_string(),
            None => view
                .map(|v| v.creator.to_string())
                .ok_or_else(|| Error::InvalidFormat("block has no iss".into()))?,
        };

        if kind.is_identity() && !payload.contains_key("pkt") {
            return Err(Error::InvalidFormat("identity block has no pkt".into()));
        }
        if matches!(kind, BlockKind::IdentityGenesis | BlockKind::AuthGenesis)
            && payload.get("sub").and_then(Value::as_str).is_none()
        {
            return Err(Error::InvalidFormat("genesis block has no sub".into()));
        }

        let grants = if kind.is_auth() {
            payload
                .get("grants")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::InvalidFormat("auth block has no grants".into()))?
                .iter()
                .map(Grant::from_json)
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            kind,
            creator,
            signer: Signer::Thumbprint(header.kid),
            payload,
            grants,
            serialization: Some(token.to_string()),
        })
    }

    /// The role this block plays in its chain.
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Account URI of the block creator.
    #[must_use]
    pub fn creator(&self) -> &str {
        &self.creator
    }

    /// The raw payload map.
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.payload
    }

    /// Hash of the antecedent block, absent on genesis blocks.
    #[must_use]
    pub fn antecedent(&self) -> Option<&str> {
        self.payload.get("ant").and_then(Value::as_str)
    }

    /// Set or clear the antecedent hash.
    ///
    /// Clearing removes the `ant` key entirely. A cached serialization is
    /// left untouched, so editing a sealed block desynchronizes payload and
    /// token — exactly what validation exists to catch.
    pub fn set_antecedent(&mut self, antecedent: Option<&str>) {
        match antecedent {
            Some(ant) => {
                self.payload
                    .insert("ant".to_string(), Value::String(ant.to_string()));
            }
            None => {
                self.payload.shift_remove("ant");
            }
        }
    }

    /// The next-key thumbprint claim of identity-chain blocks.
    #[must_use]
    pub fn pkt(&self) -> Option<&str> {
        self.payload.get("pkt").and_then(Value::as_str)
    }

    /// The chain subject, present on genesis blocks.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("sub").and_then(Value::as_str)
    }

    /// The chain type id, present on genesis blocks.
    #[must_use]
    pub fn tid(&self) -> Option<&str> {
        self.payload.get("tid").and_then(Value::as_str)
    }

    /// Grants carried by authorization-chain blocks.
    #[must_use]
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// Append a grant to an authorization-chain block.
    pub fn add_grant(&mut self, grant: Grant) {
        self.grants.push(grant);
    }

    /// Thumbprint of the signing key: from the JWS header once sealed, from
    /// the captured key while still a draft.
    pub fn kid(&self) -> Result<String> {
        if let Some(token) = &self.serialization {
            return Ok(jws::decode(token)?.0.kid);
        }
        match &self.signer {
            Signer::Key(key) => key.thumbprint(),
            Signer::Thumbprint(tp) => Ok(tp.clone()),
        }
    }

    /// The JSON payload this block signs, with the kind-specific shape:
    /// identity-chain blocks omit `iss`, authorization-chain blocks omit
    /// `pkt` and carry their grant list under `grants`.
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        let mut d = self.payload.clone();
        match self.kind {
            BlockKind::Identity => {
                d.shift_remove("iss");
            }
            BlockKind::AuthGenesis | BlockKind::Auth => {
                d.shift_remove("pkt");
                let grants = self
                    .grants
                    .iter()
                    .map(|g| serde_json::to_value(g).unwrap_or(Value::Null))
                    .collect();
                d.insert("grants".to_string(), Value::Array(grants));
            }
            BlockKind::Base | BlockKind::IdentityGenesis => {}
        }
        d
    }

    /// [`to_json`](Self::to_json) with keys dropped (`omit`), renamed
    /// (`remap`, renamed keys move to the end), and injected (`add`).
    ///
    /// # Errors
    /// `Error::Value` if an `add` key already exists.
    pub fn to_json_with(
        &self,
        omit: &[&str],
        remap: &[(&str, &str)],
        add: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut d = self.to_json();
        for key in omit {
            d.shift_remove(*key);
        }
        for (old, new) in remap {
            if let Some(v) = d.shift_remove(*old) {
                d.insert((*new).to_string(), v);
            }
        }
        for (k, v) in add {
            if d.contains_key(&k) {
                return Err(Error::Value(format!("value exists: {k}")));
            }
            d.insert(k, v);
        }
        Ok(d)
    }

    /// Seal the block into its compact JWS, or return the cached token.
    ///
    /// Serialization is idempotent: the first call signs, every later call
    /// returns the same bytes. Use [`reserialize`](Self::reserialize) to
    /// force a new signature.
    pub fn serialize(&mut self) -> Result<String> {
        if self.serialization.is_none() {
            self.serialization = Some(self.sign()?);
        }
        Ok(self.serialization.clone().expect("just sealed"))
    }

    /// Discard any cached serialization and sign again.
    pub fn reserialize(&mut self) -> Result<String> {
        self.serialization = Some(self.sign()?);
        Ok(self.serialization.clone().expect("just sealed"))
    }

    fn sign(&self) -> Result<String> {
        let Signer::Key(key) = &self.signer else {
            return Err(Error::Value("block has no signing key".into()));
        };
        jws::sign(&self.to_json(), key)
    }

    pub(crate) fn token(&self) -> Result<&str> {
        self.serialization
            .as_deref()
            .ok_or_else(|| Error::Value("block is not serialized".into()))
    }

    /// Lowercase hex SHA-256 of the sealed compact JWS.
    ///
    /// # Errors
    /// `Error::Value` if the block has not been serialized yet.
    pub fn hash(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.token()?.as_bytes())))
    }

    /// Verify the block signature, resolving the header `kid` in the
    /// context's key store. Seals the block if needed.
    pub fn verify(&mut self, ctx: &Context) -> Result<()> {
        let token = self.serialize()?;
        let kid = jws::decode(&token)?.0.kid;
        let key = ctx.keys().get(&kid)?;
        jws::verify(&token, &key)
    }

    /// Verify the block signature with a specific key.
    pub fn verify_with(&mut self, key: &Jwk) -> Result<()> {
        let token = self.serialize()?;
        jws::verify(&token, key)
    }

    pub(crate) fn validate(&self, ratchet: &mut Ratchet, ctx: &Context) -> Result<()> {
        self.validate_antecedent(ratchet)?;
        match self.kind {
            BlockKind::Base => self.validate_signature(ratchet, ctx),
            BlockKind::IdentityGenesis | BlockKind::Identity => {
                identitychain::validate_signature(self, ratchet, ctx)
            }
            BlockKind::AuthGenesis | BlockKind::Auth => {
                authchain::validate_signature(self, ratchet, ctx)?;
                authchain::validate_grants(self, ratchet)
            }
        }
    }

    fn validate_antecedent(&self, ratchet: &Ratchet) -> Result<()> {
        if self.antecedent() != ratchet.antecedent_hash() {
            return Err(Error::ChainValidation(format!(
                "Antecedent hash mismatch: {} (block) != {} (antecedent)",
                self.antecedent().unwrap_or("None"),
                ratchet.antecedent_hash().unwrap_or("None"),
            )));
        }
        Ok(())
    }

    fn validate_signature(&self, ratchet: &mut Ratchet, ctx: &Context) -> Result<()> {
        if ratchet.antecedent_hash().is_none() {
            ratchet.advance(self)?;
        }
        let kid = self.kid()?;
        let key = ctx.keys().get(&kid)?;
        jws::verify(self.token()?, &key)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pretty = serde_json::to_string_pretty(&Value::Object(self.to_json()))
            .unwrap_or_else(|_| "{}".to_string());
        write!(f, "{pretty}")
    }
}

/// Validation state carried down a chain, advanced one block at a time.
///
/// Blocks read the ratchet for everything beyond their own payload; they
/// never see the chain container or future blocks.
#[derive(Debug)]
pub(crate) struct Ratchet {
    antecedent_hash: Option<String>,
    ext: RatchetExt,
}

#[derive(Debug)]
enum RatchetExt {
    Base,
    Identity {
        antecedent_pkt: Option<String>,
    },
    Auth {
        recent_thumbprints: HashMap<String, String>,
        current_grants: HashMap<String, HashMap<String, Grant>>,
    },
}

impl Ratchet {
    pub(crate) fn base() -> Self {
        Self {
            antecedent_hash: None,
            ext: RatchetExt::Base,
        }
    }

    pub(crate) fn identity() -> Self {
        Self {
            antecedent_hash: None,
            ext: RatchetExt::Identity { antecedent_pkt: None },
        }
    }

    pub(crate) fn auth() -> Self {
        Self {
            antecedent_hash: None,
            ext: RatchetExt::Auth {
                recent_thumbprints: HashMap::new(),
                current_grants: HashMap::new(),
            },
        }
    }

    pub(crate) fn antecedent_hash(&self) -> Option<&str> {
        self.antecedent_hash.as_deref()
    }

    pub(crate) fn antecedent_pkt(&self) -> Option<&str> {
        match &self.ext {
            RatchetExt::Identity { antecedent_pkt } => antecedent_pkt.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn recent_thumbprint(&self, acct: &str) -> Option<&str> {
        match &self.ext {
            RatchetExt::Auth { recent_thumbprints, .. } => {
                recent_thumbprints.get(acct).map(String::as_str)
            }
            _ => None,
        }
    }

    pub(crate) fn current_grants(&self, acct: &str) -> Option<&HashMap<String, Grant>> {
        match &self.ext {
            RatchetExt::Auth { current_grants, .. } => current_grants.get(acct),
            _ => None,
        }
    }

    /// Fold a validated block into the state. The fold is an overwrite:
    /// the most recent grant for a `(grantee, privilege)` pair wins.
    pub(crate) fn advance(&mut self, block: &Block) -> Result<()> {
        match &mut self.ext {
            RatchetExt::Base => {}
            RatchetExt::Identity { antecedent_pkt } => {
                let pkt = block
                    .pkt()
                    .ok_or_else(|| Error::ChainValidation("Identity block has no pkt".into()))?;
                *antecedent_pkt = Some(pkt.to_string());
            }
            RatchetExt::Auth {
                recent_thumbprints,
                current_grants,
            } => {
                for grant in block.grants() {
                    current_grants
                        .entry(grant.grantee.clone())
                        .or_default()
                        .insert(grant.privilege.clone(), grant.clone());
                    recent_thumbprints.insert(grant.grantee.clone(), grant.thumbprint.clone());
                }
            }
        }
        self.antecedent_hash = Some(block.hash()?);
        Ok(())
    }
}

/// Seal every block and return the chain serialization: a JSON array of the
/// per-block compact JWS strings, in chain order.
pub(crate) fn serialize_blocks(blocks: &mut [Block]) -> Result<String> {
    Ok(serde_json::to_string(&block_tokens(blocks)?)?)
}

pub(crate) fn block_tokens(blocks: &mut [Block]) -> Result<Vec<String>> {
    blocks.iter_mut().map(Block::serialize).collect()
}

pub(crate) fn parse_tokens(data: &str) -> Result<Vec<String>> {
    serde_json::from_str(data)
        .map_err(|e| Error::InvalidFormat(format!("invalid chain serialization: {e}")))
}

/// Hash of the current tail block, sealing it first. `None` on an empty chain.
pub(crate) fn tail_hash(blocks: &mut [Block]) -> Result<Option<String>> {
    match blocks.last_mut() {
        Some(block) => {
            block.serialize()?;
            Ok(Some(block.hash()?))
        }
        None => Ok(None),
    }
}

/// The shared validation protocol: genesis hash check, then every block is
/// validated against the ratchet and folded in, strictly in order.
pub(crate) fn validate_blocks(
    blocks: &mut [Block],
    genesis_hash: &str,
    mut ratchet: Ratchet,
    ctx: &Context,
) -> Result<()> {
    if blocks.is_empty() {
        return Err(Error::ChainValidation("Empty chain".into()));
    }
    for block in blocks.iter_mut() {
        block.serialize()?;
    }

    let actual = blocks[0].hash()?;
    if actual != genesis_hash {
        return Err(Error::ChainValidation(format!(
            "Genesis hash mismatch: {actual} (self) != {genesis_hash} (requested)"
        )));
    }

    for block in blocks.iter() {
        block.validate(&mut ratchet, ctx)?;
        ratchet.advance(block)?;
    }
    Ok(())
}

pub(crate) fn display_blocks(blocks: &[Block], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, block) in blocks.iter().enumerate() {
        writeln!(f, "Block #{i}:")?;
        writeln!(f, "{block}")?;
    }
    Ok(())
}

/// An ordered, hash-linked container of base [`Block`]s.
#[derive(Debug, Clone, Default)]
pub struct BlockChain {
    blocks: Vec<Block>,
}

impl BlockChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct and append a block. The first block added is the genesis
    /// (no antecedent); later blocks link to the current tail hash.
    pub fn add_block(
        &mut self,
        identity: &Identity,
        payload: Map<String, Value>,
    ) -> Result<&mut Block> {
        let antecedent = tail_hash(&mut self.blocks)?;
        let block = Block::new(identity, antecedent.as_deref(), payload);
        self.blocks.push(block);
        Ok(self.blocks.last_mut().expect("just pushed"))
    }

    /// Append a pre-constructed block, rewriting its antecedent to the
    /// current tail hash (or clearing it on an empty chain).
    pub fn push(&mut self, mut block: Block) -> Result<&mut Block> {
        let antecedent = tail_hash(&mut self.blocks)?;
        block.set_antecedent(antecedent.as_deref());
        self.blocks.push(block);
        Ok(self.blocks.last_mut().expect("just pushed"))
    }

    /// The genesis block, if the chain is non-empty.
    #[must_use]
    pub fn genesis(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Chain subject: the genesis block's `sub` claim, when present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.genesis().and_then(Block::subject)
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
        serialize_blocks(&mut self.blocks)
    }

    /// JSON form of every block, in chain order.
    #[must_use]
    pub fn to_json(&self) -> Vec<Map<String, Value>> {
        self.blocks.iter().map(Block::to_json).collect()
    }

    /// Rehydrate a chain, treating every element as a base block. Use
    /// [`Chain::deserialize`](crate::Chain::deserialize) to dispatch on the
    /// genesis type id instead.
    pub fn deserialize(data: &str) -> Result<Self> {
        let tokens = parse_tokens(data)?;
        let blocks = tokens
            .iter()
            .map(|t| Block::from_token(t, BlockKind::Base, None))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    /// Validate the chain against a known genesis hash.
    pub fn validate(&mut self, genesis_hash: &str, ctx: &Context) -> Result<()> {
        validate_blocks(&mut self.blocks, genesis_hash, Ratchet::base(), ctx)
    }
}

impl Deref for BlockChain {
    type Target = [Block];

    fn deref(&self) -> &[Block] {
        &self.blocks
    }
}

impl DerefMut for BlockChain {
    fn deref_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }
}

impl fmt::Display for BlockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_blocks(&self.blocks, f)
    }
}
