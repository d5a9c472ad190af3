//! FROST cosigner CLI
//!
//! Entry point for running a cosigner node, the one-shot keygen
//! ceremony, or printing the group public key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use frost_cosigner::{
    create_router, dkg, AppState, Config, KeyShare, LocalCosigner, RemoteCosigners,
    ThresholdValidator,
};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Constant prefix prepended to the group key before bech32 encoding.
const PUBKEY_PREFIX: [u8; 5] = [0x16, 0x24, 0xDE, 0x64, 0x20];

#[derive(Parser)]
#[command(name = "frost-cosigner")]
#[command(about = "FROST Ed25519 threshold cosigner for Tendermint validators")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Bech32 prefix for print-pubkey (prints base64 when absent)
    #[arg(long)]
    pubkey_hrp: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cosigner node
    Sign,
    /// Run the one-shot distributed key generation ceremony
    Keygen,
    /// Print the group public key
    PrintPubkey,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,frost_cosigner=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Sign => run_signer(config).await?,
        Commands::Keygen => dkg::run_keygen(&config).await?,
        Commands::PrintPubkey => print_pubkey(&config, cli.pubkey_hrp.as_deref())?,
    }

    Ok(())
}

/// Run the cosigner node: serve the cosigner RPC and hold the
/// threshold validator for the host-facing interface.
async fn run_signer(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let local = Arc::new(LocalCosigner::new(&config)?);
    let peers = RemoteCosigners::new(&config, local.verifying_key().clone())?;
    let validator = ThresholdValidator::new(local.clone(), peers)?;

    tracing::info!(
        cosigner_id = local.id(),
        pubkey = %hex::encode(validator.pub_key()),
        "threshold validator ready"
    );
    for node in &config.nodes {
        tracing::info!(address = %node.address, "host validator configured");
    }

    let state = Arc::new(AppState { local });
    let app = create_router(state);
    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "cosigner listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Print the group public key, base64 with its address or bech32.
fn print_pubkey(config: &Config, hrp: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let share = KeyShare::load(&config.key_share_file)?;
    let group_key = share.group_key()?;

    match hrp {
        None => {
            println!("pubkey: {}", STANDARD.encode(group_key));
            let digest = Sha256::digest(group_key);
            println!("address: {}", hex::encode_upper(&digest[..20]));
        }
        Some(hrp) => {
            println!("pubkey: {}", bech32_pubkey(hrp, &group_key)?);
        }
    }
    Ok(())
}

/// Prefix the key, regroup 8 → 5 bits and bech32 encode.
fn bech32_pubkey(hrp: &str, key: &[u8; 32]) -> Result<String, bech32::Error> {
    use bech32::ToBase32;

    let mut data = PUBKEY_PREFIX.to_vec();
    data.extend_from_slice(key);
    bech32::encode(hrp, data.to_base32(), bech32::Variant::Bech32)
}
