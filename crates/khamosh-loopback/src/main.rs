use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use khamosh_crypto::{
    CryptoProvider, DalekProvider, Keychain, MemoryKeychain, MemorySessionRecordStore,
    SessionRecordStore,
};
use khamosh_protocol::{
    Delivery, MemoryBus, MemoryDirectory, MessageEnvelopeProtocol, ProtocolConfig, SqliteStore,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

type Party = MessageEnvelopeProtocol<MemoryDirectory, MemoryBus>;

const DEFAULT_MESSAGES: u32 = 5;

/// Command-line arguments for the loopback run.
struct Args {
    config_path: Option<PathBuf>,
    db_dir: Option<PathBuf>,
    messages: u32,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut db_dir = None;
    let mut messages = DEFAULT_MESSAGES;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().map(PathBuf::from),
            "--db" => db_dir = args.next().map(PathBuf::from),
            "--messages" => {
                let value = args.next().unwrap_or_default();
                messages = value
                    .parse()
                    .with_context(|| format!("--messages expects a number, got {value:?}"))?;
            }
            other => bail!("unknown argument {other:?}"),
        }
    }

    Ok(Args {
        config_path,
        db_dir,
        messages,
    })
}

/// Keychain and session records for one party: `SQLite` under `db_dir` when
/// given, in memory otherwise.
fn stores(
    db_dir: Option<&Path>,
    id: &str,
) -> anyhow::Result<(Arc<dyn Keychain>, Arc<dyn SessionRecordStore>)> {
    match db_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let store = Arc::new(SqliteStore::open(dir.join(format!("{id}.db")))?);
            let keychain: Arc<dyn Keychain> = store.clone();
            let records: Arc<dyn SessionRecordStore> = store;
            Ok((keychain, records))
        }
        None => {
            let keychain: Arc<dyn Keychain> = Arc::new(MemoryKeychain::new());
            let records: Arc<dyn SessionRecordStore> = Arc::new(MemorySessionRecordStore::new());
            Ok((keychain, records))
        }
    }
}

/// Answer every message in `inbox` with an acknowledgement until shut down.
async fn echo_loop(
    party: Arc<Party>,
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(delivery) = inbox.recv() => {
                match party.handle_incoming(&delivery.topic, &delivery.payload).await {
                    Ok(received) => {
                        tracing::info!(
                            from = %received.sender,
                            kind = ?received.kind,
                            text = %String::from_utf8_lossy(&received.plaintext),
                            "bob received"
                        );
                        let mut reply = b"ack: ".to_vec();
                        reply.extend_from_slice(&received.plaintext);
                        if let Err(e) = party.send_message(&received.sender, &reply).await {
                            tracing::warn!(error = %e, "bob failed to reply");
                        }
                    }
                    Err(e) => tracing::warn!(topic = %delivery.topic, error = %e, "bob dropped payload"),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    tracing::debug!("echo loop stopped");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = match &args.config_path {
        Some(path) => ProtocolConfig::from_json_file(path)?,
        None => ProtocolConfig::default(),
    };
    tracing::info!(prefix = %config.topic_prefix, messages = args.messages, "khamosh-loopback starting");

    let provider: Arc<dyn CryptoProvider> = Arc::new(DalekProvider);
    let directory = Arc::new(MemoryDirectory::new(Arc::clone(&provider)));
    let bus = Arc::new(MemoryBus::new());

    let mut parties = Vec::with_capacity(2);
    for id in ["alice", "bob"] {
        let (keychain, records) = stores(args.db_dir.as_deref(), id)?;
        let party = Party::new(
            config.clone(),
            id,
            keychain,
            records,
            Arc::clone(&provider),
            Arc::clone(&directory),
            Arc::clone(&bus),
        )?;
        let inbox = bus.subscribe(&party.inbox());
        party.register().await?;
        parties.push((Arc::new(party), inbox));
    }
    let (bob, bob_inbox) = parties.pop().context("bob missing")?;
    let (alice, mut alice_inbox) = parties.pop().context("alice missing")?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let echo = tokio::spawn(echo_loop(Arc::clone(&bob), bob_inbox, shutdown_rx));

    for i in 0..args.messages {
        let text = format!("message {i}");
        let kind = alice.send_message("bob", text.as_bytes()).await?;
        tracing::info!(kind = ?kind, text = %text, "alice sent");

        let delivery = alice_inbox
            .recv()
            .await
            .context("bus closed before bob replied")?;
        let reply = alice
            .handle_incoming(&delivery.topic, &delivery.payload)
            .await?;
        tracing::info!(
            kind = ?reply.kind,
            text = %String::from_utf8_lossy(&reply.plaintext),
            "alice received"
        );
    }

    let _ = shutdown_tx.send(()).await;
    echo.await.context("echo loop panicked")?;

    alice.end_conversation("bob").await;
    bob.end_conversation("alice").await;
    let alice_state = alice.session_state("bob").await?;
    tracing::info!(
        alice_state = ?alice_state,
        bob_opks_left = bob.remaining_prekeys()?,
        "khamosh-loopback finished"
    );
    Ok(())
}
