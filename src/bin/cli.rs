//! sigchain CLI: key generation, identity bootstrap, and chain inspection.

use clap::{Arg, ArgAction, Command};
use sigchain::{Chain, Context, Identity, IdentityChain, Jwk};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let matches = Command::new("sigchain")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Signed block chains: keys, identities, and chain inspection")
        .arg(
            Arg::new("server")
                .long("server")
                .value_name("URL")
                .help("URL of a remote key/chain server")
                .global(true),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate an EC P-256 keypair")
                .arg(
                    Arg::new("output")
                        .short('f')
                        .long("output")
                        .value_name("FILE")
                        .help("Output file for the private key; the public key lands in FILE.pub"),
                )
                .arg(
                    Arg::new("compact")
                        .long("compact")
                        .help("Write the keys in compact JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("identity")
                .about("Build an identity with its identity chain")
                .arg(
                    Arg::new("key")
                        .short('k')
                        .long("key")
                        .value_name("FILE")
                        .help("File containing a private JWK (generated when omitted)"),
                )
                .arg(
                    Arg::new("iss")
                        .long("iss")
                        .value_name("URI")
                        .help("Identity issuer account URI"),
                ),
        )
        .subcommand(
            Command::new("blockchain")
                .about("Read and print a serialized block chain")
                .arg(
                    Arg::new("chainfile")
                        .value_name("FILE")
                        .help("File containing a serialized block chain")
                        .required(true),
                ),
        )
        .get_matches();

    let ctx = match matches.get_one::<String>("server") {
        Some(url) => Context::with_server(url)?,
        None => Context::new(),
    };

    match matches.subcommand() {
        Some(("keygen", sub_matches)) => keygen_command(&ctx, sub_matches),
        Some(("identity", sub_matches)) => identity_command(&ctx, sub_matches),
        Some(("blockchain", sub_matches)) => blockchain_command(sub_matches),
        _ => {
            eprintln!("Nothing to do, see --help");
            std::process::exit(1);
        }
    }
}

fn default_keyfile() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".sigchain").join("key")
}

fn prompt(message: &str) -> Result<String, Box<dyn std::error::Error>> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn write_key(path: &Path, key: &Jwk, compact: bool) -> Result<(), Box<dyn std::error::Error>> {
    let json = if compact {
        serde_json::to_string(key)?
    } else {
        serde_json::to_string_pretty(key)?
    };
    fs::write(path, json + "\n")?;
    Ok(())
}

fn keygen_command(
    ctx: &Context,
    matches: &clap::ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let keyfile = matches
        .get_one::<String>("output")
        .map_or_else(default_keyfile, PathBuf::from);

    if keyfile.exists() {
        println!("{} already exists.", keyfile.display());
        if prompt("Overwrite (y/n)? ")? != "y" {
            return Ok(());
        }
    }
    if let Some(parent) = keyfile.parent() {
        fs::create_dir_all(parent)?;
    }

    println!("Generating public/private P-256 key pair.");
    let key = ctx.new_key()?;
    let compact = matches.get_flag("compact");

    let pubfile = PathBuf::from(format!("{}.pub", keyfile.display()));
    write_key(&keyfile, &key, compact)?;
    write_key(&pubfile, &key.public(), compact)?;
    println!("Your private key has been saved in {}", keyfile.display());
    println!("Your public key has been saved in {}", pubfile.display());

    if let Some(server) = matches.get_one::<String>("server") {
        println!("## Uploading public key to {server}");
        let thumbprint = ctx.keys().upload(&key)?;
        println!("## Key URL: {server}/keys/{thumbprint}");
    }

    println!("The key fingerprint is:\n{}", key.thumbprint()?);
    Ok(())
}

fn identity_command(
    ctx: &Context,
    matches: &clap::ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = match matches.get_one::<String>("key") {
        Some(keyfile) => {
            let key = Jwk::from_json(&fs::read_to_string(keyfile)?)?;
            if !key.is_private() {
                eprintln!("Error loading key: {keyfile} does not contain a private key");
                std::process::exit(1);
            }
            ctx.keys().add(key.clone())?;
            key
        }
        None => ctx.new_key()?,
    };

    let iss = match matches.get_one::<String>("iss") {
        Some(iss) => iss.clone(),
        None => prompt("iss? ")?,
    };

    let mut ident = Identity::new(iss, key)?;
    let acct = ident.acct().to_string();
    let mut idchain = IdentityChain::from_identity(&mut ident, &acct)?;
    ident.set_idchain(idchain.serialize()?);

    let json = serde_json::Value::Object(ident.to_json(true));
    println!("{}", serde_json::to_string_pretty(&json)?);
    println!("\n## IdentityChain ##:\n{idchain}");
    Ok(())
}

fn blockchain_command(matches: &clap::ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let chainfile = matches.get_one::<String>("chainfile").expect("required arg");
    let data = fs::read_to_string(chainfile)?;
    let chain = Chain::deserialize(&data)?;
    print!("{chain}");
    Ok(())
}
