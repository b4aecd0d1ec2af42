//! Cipherline device tool.
//!
//! # Usage
//!
//! ```bash
//! # Create this device's identity and print the key to publish
//! cipherline --store alice.redb register
//!
//! # Seal a message for a peer, then open it on the peer's device
//! cipherline --store alice.redb seal --peer-key <BOB_KEY> "hello"
//! cipherline --store bob.redb open --peer-key <ALICE_KEY> <CIPHERTEXT>
//!
//! # Two in-process devices, including a key rotation that self-heals
//! cipherline demo
//! ```

#![allow(clippy::print_stdout, reason = "Command output goes to stdout; logs go to stderr")]

use std::path::{Path, PathBuf};

use cipherline_client::{
    ClientError, Environment, IdentityStore, MemoryRelay, MemoryStore, MessageConsumer,
    MessagePipeline, PipelineConfig, RedbStore, SystemEnv, UserId, account,
};
use cipherline_crypto::{NONCE_SIZE, PublicKeyBytes, SessionKey, derive_session_key, open, seal};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cipherline end-to-end encryption tool
#[derive(Parser, Debug)]
#[command(name = "cipherline")]
#[command(about = "Manage a Cipherline device identity and seal or open messages")]
#[command(version)]
struct Args {
    /// Device key store
    #[arg(long, env = "CIPHERLINE_STORE", default_value = "cipherline.redb")]
    store: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new identity, replacing any existing one
    Register,

    /// Print this device's public key (base64 SEC1)
    PublicKey,

    /// Seal a message for the holder of `peer_key`
    Seal {
        /// Peer public key (base64 SEC1)
        #[arg(long)]
        peer_key: String,

        /// Message text
        text: String,
    },

    /// Open a ciphertext sent by the holder of `peer_key`
    Open {
        /// Peer public key (base64 SEC1)
        #[arg(long)]
        peer_key: String,

        /// base64(nonce || ciphertext || tag)
        ciphertext: String,
    },

    /// Run two in-process devices through a conversation
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match args.command {
        Command::Register => {
            let identities = IdentityStore::new(RedbStore::open(&args.store)?);
            let identity = identities.generate(&SystemEnv::new())?;
            println!("{}", identity.public_key().to_base64());
        },
        Command::PublicKey => {
            let identities = IdentityStore::new(RedbStore::open(&args.store)?);
            let identity = identities.load_private_key()?.ok_or(ClientError::NotRegistered)?;
            println!("{}", identity.public_key().to_base64());
        },
        Command::Seal { peer_key, text } => {
            let key = session_key(&args.store, &peer_key)?;
            let mut nonce = [0u8; NONCE_SIZE];
            SystemEnv::new().random_bytes(&mut nonce);
            println!("{}", seal(&key, text.as_bytes(), nonce));
        },
        Command::Open { peer_key, ciphertext } => {
            let key = session_key(&args.store, &peer_key)?;
            let plaintext = open(&key, &ciphertext)?;
            println!("{}", String::from_utf8_lossy(&plaintext));
        },
        Command::Demo => demo().await?,
    }

    Ok(())
}

/// Session key between this device and `peer_key`.
fn session_key(store: &Path, peer_key: &str) -> Result<SessionKey, Box<dyn std::error::Error>> {
    let identities = IdentityStore::new(RedbStore::open(store)?);
    let identity = identities.load_private_key()?.ok_or(ClientError::NotRegistered)?;
    let peer = PublicKeyBytes::from_base64(peer_key)?;

    Ok(derive_session_key(&identity, &peer)?)
}

type DemoPipeline = MessagePipeline<SystemEnv, MemoryStore>;

async fn device(
    relay: &MemoryRelay,
    name: &str,
    store: MemoryStore,
) -> Result<DemoPipeline, Box<dyn std::error::Error>> {
    let env = SystemEnv::new();
    let user = UserId::new(name);
    let endpoint = relay.endpoint(name);

    account::register(&env, &IdentityStore::new(store.clone()), &endpoint, &user).await?;
    Ok(MessagePipeline::new(env, store, endpoint.services(), PipelineConfig::new(user))?)
}

async fn deliver(
    relay: &MemoryRelay,
    name: &str,
    pipeline: &DemoPipeline,
) -> Result<(), Box<dyn std::error::Error>> {
    for envelope in relay.endpoint(name).take_inbox()? {
        let message = pipeline.on_envelope(envelope).await?;
        let text = message.display_text(pipeline.config());
        println!("{name} <- {}: {text}", message.envelope.sender_id);
    }
    Ok(())
}

async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    let relay = MemoryRelay::new();
    let alice = device(&relay, "alice", MemoryStore::new()).await?;
    let bob_store = MemoryStore::new();
    let bob = device(&relay, "bob", bob_store.clone()).await?;

    alice.open_conversation("bob").await?;
    alice.load_history().await?;
    bob.open_conversation("alice").await?;
    bob.load_history().await?;

    alice.send_text("hi bob").await?;
    deliver(&relay, "bob", &bob).await?;
    bob.send_text("hi alice").await?;
    deliver(&relay, "alice", &alice).await?;

    println!("-- bob registers again; alice still caches the old session key");
    drop(bob);
    let bob = device(&relay, "bob", bob_store).await?;
    bob.open_conversation("alice").await?;
    bob.load_history().await?;

    bob.send_text("new key, same bob").await?;
    deliver(&relay, "alice", &alice).await?;
    alice.send_text("got it").await?;
    deliver(&relay, "bob", &bob).await?;

    println!("-- alice's history");
    for message in alice.history() {
        let direction = if message.outgoing { "->" } else { "<-" };
        println!("{direction} {}", message.display_text(alice.config()));
    }
    println!("-- alice performed {} key agreements", alice.derivation_count());

    Ok(())
}
