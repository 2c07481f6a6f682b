//! Contract-ledger walkthrough over a generic block chain.
//!
//! A label runs a ledger of contract offers and acknowledgments. Replicas
//! are exchanged as serialized chains and every consumer validates against
//! the genesis hash it learned when the ledger was created.
//!
//! Run with: `cargo run --example contract`

use serde_json::{json, Map, Value};
use sigchain::{Block, BlockChain, Context, Identity};

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().expect("object literal").clone()
}

fn main() -> sigchain::Result<()> {
    let ctx = Context::new();

    let ipecac = Identity::new("label:Ipecac", ctx.new_key()?)?;
    let patton = Identity::new("artist:Mike Patton", ctx.new_key()?)?;
    let melvins = Identity::new("artist:Melvins", ctx.new_key()?)?;
    let buzzo = Identity::new("artist:King Buzzo", ctx.new_key()?)?;
    let unsane = Identity::new("artist:Unsane", ctx.new_key()?)?;
    let fnm = Identity::new("artist:Faith No More", ctx.new_key()?)?;

    // The label opens the ledger; artists append signed contract blocks.
    let mut chain = BlockChain::new();
    chain.add_block(&ipecac, payload(json!({"sub": "Ipecac recording artists"})))?;
    let genesis_hash = chain.genesis_hash()?;
    chain
        .add_block(&patton, payload(json!({"sub": "contract", "blahblah": "...."})))?
        .verify_with(patton.key())?;

    let published = chain.serialize()?;

    // Another holder of the ledger appends more contracts.
    let mut replica = BlockChain::deserialize(&published)?;
    replica.add_block(&buzzo, payload(json!({"sub": "contract", "blahblah": "...."})))?;
    replica.add_block(&melvins, payload(json!({"sub": "contract", "blahblah": "...."})))?;
    let published = replica.serialize()?;

    // Downloaded replicas validate before use. Acknowledgment blocks are
    // spliced in with push, which rewrites their antecedent to the tail.
    let mut crew = BlockChain::deserialize(&published)?;
    crew.validate(&genesis_hash, &ctx)?;
    crew.push(Block::new(&ipecac, None, payload(json!({"ack": true}))))?;
    crew.push(Block::new(&ipecac, None, payload(json!({"ack": true}))))?;
    let published = crew.serialize()?;

    // The label extends the ledger with two offers.
    let mut master = BlockChain::deserialize(&published)?;
    master.add_block(
        &ipecac,
        payload(json!({"sub": "contract:offer", "new_signing": "Unsane", "blahblah": "...."})),
    )?;
    master.add_block(
        &ipecac,
        payload(json!({"sub": "contract:offer", "new_signing": "Faith No More", "blahblah": "...."})),
    )?;
    let offers = master.serialize()?;

    // Each artist answers on their own replica.
    let mut fnm_offer = BlockChain::deserialize(&offers)?;
    fnm_offer.validate(&genesis_hash, &ctx)?;
    fnm_offer.add_block(&fnm, payload(json!({"ack": false})))?;
    let deny_upload = fnm_offer.serialize()?;

    let mut unsane_offer = BlockChain::deserialize(&offers)?;
    unsane_offer.validate(&genesis_hash, &ctx)?;
    unsane_offer.add_block(&unsane, payload(json!({"ack": true})))?;
    let accept_upload = unsane_offer.serialize()?;

    let mut yes_from_unsane = BlockChain::deserialize(&accept_upload)?;
    yes_from_unsane.validate(&genesis_hash, &ctx)?;
    let mut no_from_fnm = BlockChain::deserialize(&deny_upload)?;
    no_from_fnm.validate(&genesis_hash, &ctx)?;

    println!("Accepted ledger:\n{yes_from_unsane}");
    println!("Declined ledger:\n{no_from_fnm}");
    Ok(())
}
