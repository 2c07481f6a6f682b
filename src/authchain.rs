//! Authorization chains: who holds what privilege over a resource.
//!
//! Grants are delegable (`VIRAL_GRANT`), direct (`GRANT`), or withdrawn
//! (`REVOKE`). Effective policy is recency: scanning newest to oldest, the
//! first grant for a `(grantee, privilege)` pair wins.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blockchain::{self, Block, BlockKind, Ratchet};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::jws;
use crate::Context;

/// Chain type id embedded in authorization-chain genesis blocks.
pub const CHAIN_TYPEID: &str = "auth_XXX";

/// The kind of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantType {
    /// Delegable: the holder may grant the privilege onward.
    #[serde(rename = "VIRAL_GRANT")]
    ViralGrant,
    /// Direct assignment, not delegable.
    #[serde(rename = "GRANT")]
    Grant,
    /// Withdrawal of the privilege.
    #[serde(rename = "REVOKE")]
    Revoke,
}

impl GrantType {
    /// The wire name of this grant type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViralGrant => "VIRAL_GRANT",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
        }
    }
}

impl FromStr for GrantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "VIRAL_GRANT" => Ok(Self::ViralGrant),
            "GRANT" => Ok(Self::Grant),
            "REVOKE" => Ok(Self::Revoke),
            other => Err(Error::Value(format!("invalid grant type: {other}"))),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One privilege assignment: `(type, privilege, grantee, thumbprint)`.
///
/// The thumbprint binds the grantee account to a signing key at grant time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grant {
    /// The grant kind.
    #[serde(rename = "type")]
    pub kind: GrantType,
    /// The privilege name, e.g. `"participant"`.
    pub privilege: String,
    /// Account URI of the grantee.
    pub grantee: String,
    /// Thumbprint of the grantee's key at grant time.
    pub thumbprint: String,
}

impl Grant {
    /// Create a grant.
    #[must_use]
    pub fn new(
        kind: GrantType,
        privilege: impl Into<String>,
        grantee: impl Into<String>,
        thumbprint: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            privilege: privilege.into(),
            grantee: grantee.into(),
            thumbprint: thumbprint.into(),
        }
    }

    /// Parse a grant from its JSON object form.
    pub fn from_json(data: &Value) -> Result<Self> {
        let field = |name: &str| {
            data.get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidFormat(format!("grant has no {name}")))
        };
        Ok(Self {
            kind: field("type")?.parse()?,
            privilege: field("privilege")?.to_string(),
            grantee: field("grantee")?.to_string(),
            thumbprint: field("thumbprint")?.to_string(),
        })
    }
}

/// A chain expressing authorization policy over a named resource.
#[derive(Debug, Clone)]
pub struct AuthChain {
    blocks: Vec<Block>,
}

impl AuthChain {
    /// Create a chain for `resource` with an empty-granted genesis block.
    ///
    /// Grants are added to the genesis afterwards, before the chain is first
    /// serialized.
    #[must_use]
    pub fn new(identity: &Identity, resource: &str) -> Self {
        let mut block = Block::with_kind(BlockKind::AuthGenesis, identity, None, Map::new());
        let payload = block.payload_mut();
        payload.insert("grants".to_string(), Value::Array(Vec::new()));
        payload.insert("tid".to_string(), Value::String(CHAIN_TYPEID.to_string()));
        payload.insert("sub".to_string(), Value::String(resource.to_string()));
        Self { blocks: vec![block] }
    }

    /// Construct and append an empty block for `identity` to fill with
    /// grants via [`Block::add_grant`].
    pub fn add_block(&mut self, identity: &Identity) -> Result<&mut Block> {
        let antecedent = blockchain::tail_hash(&mut self.blocks)?
            .ok_or_else(|| Error::Value("chain has no genesis block".into()))?;
        let mut block = Block::with_kind(BlockKind::Auth, identity, Some(&antecedent), Map::new());
        block
            .payload_mut()
            .insert("grants".to_string(), Value::Array(Vec::new()));
        self.blocks.push(block);
        Ok(self.blocks.last_mut().expect("just pushed"))
    }

    /// The resource URI this chain governs (the genesis `sub`).
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.subject()
    }

    /// Chain subject, identical to [`resource`](Self::resource).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.blocks.first().and_then(Block::subject)
    }

    /// The chain creator from the genesis block.
    #[must_use]
    pub fn creator(&self) -> Option<&str> {
        self.blocks.first().map(Block::creator)
    }

    /// Whether `acct` currently holds `privilege`.
    ///
    /// Recency wins: the newest grant for the pair decides, and a `REVOKE`
    /// means no privilege. Read-only; no validation is performed.
    #[must_use]
    pub fn has_privilege(&self, acct: &str, privilege: &str) -> bool {
        for block in self.blocks.iter().rev() {
            for grant in block.grants() {
                if grant.grantee == acct && grant.privilege == privilege {
                    return grant.kind != GrantType::Revoke;
                }
            }
        }
        false
    }

    /// The identity the newest grant binds `acct` to, with its key resolved
    /// through the key store. `None` if no grant names the account.
    pub fn get_grant_identity(&self, acct: &str, ctx: &Context) -> Result<Option<Identity>> {
        for block in self.blocks.iter().rev() {
            for grant in block.grants() {
                if grant.grantee == acct {
                    let key = ctx.keys().get(&grant.thumbprint)?;
                    return Identity::new(acct, key).map(Some);
                }
            }
        }
        Ok(None)
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

    /// Rehydrate an authorization chain.
    pub fn deserialize(data: &str) -> Result<Self> {
        let tokens = blockchain::parse_tokens(data)?;
        let mut blocks = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            let kind = if i == 0 { BlockKind::AuthGenesis } else { BlockKind::Auth };
            blocks.push(Block::from_token(token, kind, None)?);
        }
        Ok(Self { blocks })
    }

    /// Validate against a known genesis hash: hash linkage, signer freshness
    /// against each creator's identity chain, and grant authority.
    pub fn validate(&mut self, genesis_hash: &str, ctx: &Context) -> Result<()> {
        blockchain::validate_blocks(&mut self.blocks, genesis_hash, Ratchet::auth(), ctx)
    }

    /// JSON form of every block, in chain order.
    #[must_use]
    pub fn to_json(&self) -> Vec<Map<String, Value>> {
        self.blocks.iter().map(Block::to_json).collect()
    }
}

impl Deref for AuthChain {
    type Target = [Block];

    fn deref(&self) -> &[Block] {
        &self.blocks
    }
}

impl DerefMut for AuthChain {
    fn deref_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }
}

impl fmt::Display for AuthChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        blockchain::display_blocks(&self.blocks, f)
    }
}

/// Signature and authority check for authorization-chain blocks.
///
/// The creator must already hold a grant (recorded in the ratchet), and the
/// signing key must be the same as, or a successor of, the key that grant
/// named — resolved through the creator's identity chain.
pub(crate) fn validate_signature(block: &Block, ratchet: &mut Ratchet, ctx: &Context) -> Result<()> {
    if ratchet.antecedent_hash().is_none() {
        ratchet.advance(block)?;
    }

    let kid = block.kid()?;
    let chain = ctx.chains().get(block.creator())?;
    let idchain = chain.as_identity().ok_or_else(|| {
        Error::Value(format!("chain for {} is not an identity chain", block.creator()))
    })?;

    let Some(known) = ratchet.recent_thumbprint(block.creator()) else {
        return Err(Error::ChainValidation(format!(
            "No grants for creator: {}",
            block.creator()
        )));
    };

    if idchain.is_same_or_subsequent(&kid, known)? {
        let key = ctx.keys().get(&kid)?;
        jws::verify(block.token()?, &key)
    } else {
        Err(Error::ChainValidation("Out of date key".into()))
    }
}

/// Grant-authority check: every privilege granted by this block must be held
/// by the creator as `VIRAL_GRANT`. The genesis block is exempt.
pub(crate) fn validate_grants(block: &Block, ratchet: &Ratchet) -> Result<()> {
    if block.kind() == BlockKind::AuthGenesis {
        return Ok(());
    }

    let creator_grants = ratchet.current_grants(block.creator()).ok_or_else(|| {
        Error::ChainValidation(format!("No grants for creator: {}", block.creator()))
    })?;
    for grant in block.grants() {
        match creator_grants.get(&grant.privilege) {
            Some(held) if held.kind == GrantType::ViralGrant => {}
            _ => return Err(Error::ChainValidation("Failed grant check".into())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::identitychain::IdentityChain;
    use serde_json::json;

    fn make_identity(ctx: &Context, acct: &str) -> Identity {
        let ident = Identity::new(acct, ctx.new_key().unwrap()).unwrap();
        let idchain = IdentityChain::new(&ident, ident.acct()).unwrap();
        ctx.chains().add(Chain::Identity(idchain)).unwrap();
        ident
    }

    #[test]
    fn test_grant_type_parsing() {
        for (name, kind) in [
            ("VIRAL_GRANT", GrantType::ViralGrant),
            ("GRANT", GrantType::Grant),
            ("REVOKE", GrantType::Revoke),
        ] {
            assert_eq!(name.parse::<GrantType>().unwrap(), kind);
            assert_eq!(kind.as_str(), name);
        }
        assert!(matches!("FOOBAZZ".parse::<GrantType>(), Err(Error::Value(_))));
    }

    #[test]
    fn test_grant_json() {
        let grant = Grant::new(GrantType::Grant, "participant", "acct:jus", "tprint");
        let value = serde_json::to_value(&grant).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "GRANT",
                "privilege": "participant",
                "grantee": "acct:jus",
                "thumbprint": "tprint"
            })
        );
        assert_eq!(Grant::from_json(&value).unwrap(), grant);

        let bad = json!({"type": "NOPE", "privilege": "p", "grantee": "g", "thumbprint": "t"});
        assert!(matches!(Grant::from_json(&bad), Err(Error::Value(_))));
    }

    #[test]
    fn test_genesis_block() {
        let ctx = Context::new();
        let liz = make_identity(&ctx, "acct:liz@electricwizard.org");
        let chain = AuthChain::new(&liz, "resourceURL");

        let genesis = &chain[0];
        assert_eq!(genesis.kind(), BlockKind::AuthGenesis);
        assert_eq!(genesis.creator(), liz.acct());
        assert!(genesis.antecedent().is_none());
        assert_eq!(genesis.tid().unwrap(), CHAIN_TYPEID);
        assert!(genesis.grants().is_empty());
        assert_eq!(chain.resource().unwrap(), "resourceURL");
        assert_eq!(chain.creator().unwrap(), liz.acct());
    }

    #[test]
    fn test_auth_block_json_omits_pkt_and_carries_grants() {
        let ctx = Context::new();
        let liz = make_identity(&ctx, "acct:liz@electricwizard.org");
        let mut chain = AuthChain::new(&liz, "RESOURCE");

        let block = chain.add_block(&liz).unwrap();
        block.payload_mut().insert("pkt".to_string(), json!("stray"));
        block.add_grant(Grant::new(GrantType::Grant, "member", "acct:liz", "tp1"));

        let d = block.to_json();
        assert!(!d.contains_key("pkt"));
        assert_eq!(d["grants"].as_array().unwrap().len(), 1);
        assert_eq!(d["grants"][0]["privilege"], json!("member"));
        assert!(d.contains_key("iss"));
    }

    #[test]
    fn test_validation_requires_creator_grants() {
        let ctx = Context::new();
        let jus = make_identity(&ctx, "acct:jus@electricwizard.com");
        let liz = make_identity(&ctx, "acct:liz@electricwizard.org");

        let mut chain = AuthChain::new(&jus, "RESOURCE");
        let genesis_hash = chain.genesis_hash().unwrap();

        // No grants at all.
        let err = chain.validate(&genesis_hash, &ctx).unwrap_err();
        match err {
            Error::ChainValidation(reason) => assert!(reason.starts_with("No grants for creator")),
            other => panic!("unexpected error: {other:?}"),
        }

        // A grant to somebody else is still no grant for the creator.
        chain[0].add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            liz.acct(),
            liz.thumbprint().unwrap(),
        ));
        assert!(chain.validate(&genesis_hash, &ctx).is_err());

        chain[0].add_grant(Grant::new(
            GrantType::Grant,
            "moderator",
            jus.acct(),
            jus.thumbprint().unwrap(),
        ));
        chain.validate(&genesis_hash, &ctx).unwrap();

        // Liz grants a privilege she does not hold virally.
        chain
            .add_block(&liz)
            .unwrap()
            .add_grant(Grant::new(
                GrantType::Grant,
                "participant",
                jus.acct(),
                jus.thumbprint().unwrap(),
            ));
        let err = chain.validate(&genesis_hash, &ctx).unwrap_err();
        match err {
            Error::ChainValidation(reason) => assert_eq!(reason, "Failed grant check"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_viral_delegation_policy() {
        let ctx = Context::new();
        let alice = make_identity(&ctx, "acct:alice@example.com");
        let bob = make_identity(&ctx, "acct:bob@example.com");
        let jack = make_identity(&ctx, "acct:jack@example.com");
        let diane = make_identity(&ctx, "acct:diane@example.com");
        let steve = make_identity(&ctx, "acct:steve@example.com");

        // Alice creates the chain and seeds the primordial grants.
        let resource = "xmpp:teamroom@conference.example.com";
        let mut alice_chain = AuthChain::new(&alice, resource);
        for (kind, privilege, who) in [
            (GrantType::ViralGrant, "participant", &alice),
            (GrantType::ViralGrant, "participant", &bob),
            (GrantType::ViralGrant, "moderator", &bob),
        ] {
            alice_chain[0].add_grant(Grant::new(
                kind,
                privilege,
                who.acct(),
                who.thumbprint().unwrap(),
            ));
        }
        let genesis_hash = alice_chain.genesis_hash().unwrap();
        let alice_blob = alice_chain.serialize().unwrap();

        // Bob extends it with direct and delegable grants.
        let mut bob_chain = AuthChain::deserialize(&alice_blob).unwrap();
        assert_eq!(bob_chain.serialize().unwrap(), alice_blob);
        let block = bob_chain.add_block(&bob).unwrap();
        block.add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            jack.acct(),
            jack.thumbprint().unwrap(),
        ));
        block.add_grant(Grant::new(
            GrantType::ViralGrant,
            "participant",
            diane.acct(),
            diane.thumbprint().unwrap(),
        ));
        block.add_grant(Grant::new(
            GrantType::ViralGrant,
            "moderator",
            diane.acct(),
            diane.thumbprint().unwrap(),
        ));
        let bob_blob = bob_chain.serialize().unwrap();

        // Diane revokes jack and admits steve.
        let mut diane_chain = AuthChain::deserialize(&bob_blob).unwrap();
        assert_eq!(diane_chain.serialize().unwrap(), bob_blob);
        let block = diane_chain.add_block(&diane).unwrap();
        block.add_grant(Grant::new(
            GrantType::Revoke,
            "participant",
            jack.acct(),
            jack.thumbprint().unwrap(),
        ));
        block.add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            steve.acct(),
            steve.thumbprint().unwrap(),
        ));
        let diane_blob = diane_chain.serialize().unwrap();

        let mut final_chain = AuthChain::deserialize(&diane_blob).unwrap();
        final_chain.validate(&genesis_hash, &ctx).unwrap();

        let expectations = [
            (&alice, true, false),
            (&bob, true, true),
            (&jack, false, false),
            (&diane, true, true),
            (&steve, true, false),
        ];
        for (ident, participant, moderator) in expectations {
            assert_eq!(
                final_chain.has_privilege(ident.acct(), "participant"),
                participant,
                "participant for {}",
                ident.acct()
            );
            assert_eq!(
                final_chain.has_privilege(ident.acct(), "moderator"),
                moderator,
                "moderator for {}",
                ident.acct()
            );
        }

        for ident in [&alice, &bob, &jack, &diane, &steve] {
            let bound = final_chain
                .get_grant_identity(ident.acct(), &ctx)
                .unwrap()
                .unwrap();
            assert_eq!(bound.acct(), ident.acct());
            assert_eq!(bound.key(), ident.key());
        }
    }

    #[test]
    fn test_stale_key_rejected() {
        let ctx = Context::new();
        let jus = make_identity(&ctx, "acct:jus@electricwizard.com");
        let liz = make_identity(&ctx, "acct:liz@electricwizard.org");

        // Tas rotates through three keys; the chain store sees the full
        // rotation history.
        let key1 = ctx.new_key().unwrap();
        let mut tas = Identity::new("acct:tas@electricwizard.com", key1.clone()).unwrap();
        let mut idchain = IdentityChain::new(&tas, tas.acct()).unwrap();
        for _ in 0..2 {
            let next = ctx.new_key().unwrap();
            let pkt = next.thumbprint().unwrap();
            tas.rotate_key(next).unwrap();
            idchain.add_block(&tas, &pkt).unwrap();
        }
        ctx.chains().add(Chain::Identity(idchain)).unwrap();

        let mut chain = AuthChain::new(&tas, "RESOURCE");
        chain[0].add_grant(Grant::new(
            GrantType::ViralGrant,
            "participant",
            tas.acct(),
            tas.thumbprint().unwrap(),
        ));
        chain.add_block(&tas).unwrap().add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            jus.acct(),
            jus.thumbprint().unwrap(),
        ));
        chain.add_block(&tas).unwrap().add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            liz.acct(),
            liz.thumbprint().unwrap(),
        ));
        chain.add_block(&tas).unwrap().add_grant(Grant::new(
            GrantType::Revoke,
            "participant",
            jus.acct(),
            jus.thumbprint().unwrap(),
        ));
        let genesis_hash = chain.genesis_hash().unwrap();
        chain.validate(&genesis_hash, &ctx).unwrap();

        // A block signed with the retired first key must be rejected.
        tas.rotate_key(key1).unwrap();
        chain.add_block(&tas).unwrap().add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            liz.acct(),
            liz.thumbprint().unwrap(),
        ));
        let err = chain.validate(&genesis_hash, &ctx).unwrap_err();
        match err {
            Error::ChainValidation(reason) => assert_eq!(reason, "Out of date key"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_grant_demotes_viral_holder() {
        let ctx = Context::new();
        let alice = make_identity(&ctx, "acct:alice@example.com");
        let bob = make_identity(&ctx, "acct:bob@example.com");
        let steve = make_identity(&ctx, "acct:steve@example.com");

        let mut chain = AuthChain::new(&alice, "RESOURCE");
        chain[0].add_grant(Grant::new(
            GrantType::ViralGrant,
            "participant",
            alice.acct(),
            alice.thumbprint().unwrap(),
        ));
        chain[0].add_grant(Grant::new(
            GrantType::ViralGrant,
            "participant",
            bob.acct(),
            bob.thumbprint().unwrap(),
        ));
        let genesis_hash = chain.genesis_hash().unwrap();

        // Bob re-grants alice non-virally, overwriting her delegation
        // authority.
        chain.add_block(&bob).unwrap().add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            alice.acct(),
            alice.thumbprint().unwrap(),
        ));
        chain.validate(&genesis_hash, &ctx).unwrap();
        assert!(chain.has_privilege(alice.acct(), "participant"));

        // Alice can no longer grant participant.
        chain.add_block(&alice).unwrap().add_grant(Grant::new(
            GrantType::Grant,
            "participant",
            steve.acct(),
            steve.thumbprint().unwrap(),
        ));
        let err = chain.validate(&genesis_hash, &ctx).unwrap_err();
        match err {
            Error::ChainValidation(reason) => assert_eq!(reason, "Failed grant check"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_chain_queries() {
        let ctx = Context::new();
        let chain = AuthChain::deserialize("[]").unwrap();
        assert_eq!(chain.len(), 0);
        assert!(!chain.has_privilege("acct:anyone", "participant"));
        assert!(chain.get_grant_identity("acct:anyone", &ctx).unwrap().is_none());
    }
}
