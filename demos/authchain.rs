//! Viral-delegation walkthrough.
//!
//! Alice creates an authorization chain for a conference room, bob and diane
//! extend it with delegable grants, and the final replica is validated
//! against the genesis hash before the effective policy is printed.
//!
//! Run with: `cargo run --example authchain`

use sigchain::{AuthChain, Chain, Context, Grant, GrantType, Identity, IdentityChain};

fn main() -> sigchain::Result<()> {
    let ctx = Context::new();

    let mut identities = Vec::new();
    for name in ["alice", "bob", "jack", "diane", "steve"] {
        let ident = Identity::new(format!("acct:{name}@example.com"), ctx.new_key()?)?;
        let idchain = IdentityChain::new(&ident, ident.acct())?;
        ctx.chains().add(Chain::Identity(idchain))?;
        identities.push(ident);
    }
    let [alice, bob, jack, diane, steve] = &identities[..] else {
        unreachable!();
    };

    // Alice creates an authchain for the room and seeds the primordial
    // grants into the genesis block.
    let resource = "xmpp:teamroom@conference.example.com";
    let mut alice_chain = AuthChain::new(alice, resource);
    alice_chain[0].add_grant(Grant::new(
        GrantType::ViralGrant,
        "participant",
        alice.acct(),
        alice.thumbprint()?,
    ));
    alice_chain[0].add_grant(Grant::new(
        GrantType::ViralGrant,
        "participant",
        bob.acct(),
        bob.thumbprint()?,
    ));
    alice_chain[0].add_grant(Grant::new(
        GrantType::ViralGrant,
        "moderator",
        bob.acct(),
        bob.thumbprint()?,
    ));

    // The genesis hash is shared securely out of band; the chain itself is
    // published.
    let genesis_hash = alice_chain.genesis_hash()?;
    let alice_blob = alice_chain.serialize()?;

    // Bob picks up alice's chain and adds grants of his own.
    let mut bob_chain = AuthChain::deserialize(&alice_blob)?;
    let block = bob_chain.add_block(bob)?;
    block.add_grant(Grant::new(
        GrantType::Grant,
        "participant",
        jack.acct(),
        jack.thumbprint()?,
    ));
    block.add_grant(Grant::new(
        GrantType::ViralGrant,
        "participant",
        diane.acct(),
        diane.thumbprint()?,
    ));
    block.add_grant(Grant::new(
        GrantType::ViralGrant,
        "moderator",
        diane.acct(),
        diane.thumbprint()?,
    ));
    let bob_blob = bob_chain.serialize()?;

    // Diane holds a viral participant grant, so she can revoke jack and
    // admit steve.
    let mut diane_chain = AuthChain::deserialize(&bob_blob)?;
    let block = diane_chain.add_block(diane)?;
    block.add_grant(Grant::new(
        GrantType::Revoke,
        "participant",
        jack.acct(),
        jack.thumbprint()?,
    ));
    block.add_grant(Grant::new(
        GrantType::Grant,
        "participant",
        steve.acct(),
        steve.thumbprint()?,
    ));
    let diane_blob = diane_chain.serialize()?;

    // Any consumer validates the replica against the known genesis hash.
    let mut final_chain = AuthChain::deserialize(&diane_blob)?;
    final_chain.validate(&genesis_hash, &ctx)?;

    println!("AuthChain for {resource}:\n{final_chain}");
    for ident in &identities {
        for privilege in ["participant", "moderator"] {
            println!(
                "{} \thas \"{privilege}\" privilege: {}",
                ident.acct(),
                final_chain.has_privilege(ident.acct(), privilege)
            );
        }
    }
    Ok(())
}
