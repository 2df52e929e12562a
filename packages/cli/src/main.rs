//! `tmesh`: trustmesh command-line interface.
//!
//! - **`keygen`**: generate a keypair and print its seed and public key.
//! - **`trust`**: sign a trust assertion and print it as JSON.
//! - **`score`**: load events and print one identity's trust score.
//! - **`snapshot`**: load events and print or persist the graph snapshot.
//!
//! Event input is a JSON array of signed events, or a single event, read from
//! a file path or from stdin (`-`). Invalid events are skipped with a warning.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use trustmesh::render::{render_score, render_snapshot};
use trustmesh::{
    draft_assertion, validate_event, EntityType, Event, Keypair, Registry, Signer, TrustGraph,
    TrustValue,
};
use trustmesh_engine::snapshot::sqlite::SqliteSnapshotStore;
use trustmesh_engine::transport::memory::MemoryRelay;
use trustmesh_engine::{Engine, EngineConfig};

/// tmesh: trustmesh CLI
///
/// Sign trust assertions and inspect web-of-trust scores.
#[derive(Parser)]
#[command(name = "tmesh", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a keypair and print the seed and public key.
    Keygen,

    /// Sign a trust assertion and print the event as JSON.
    ///
    /// Examples:
    ///   tmesh trust --seed <hex> --target <pubkey> --value 1
    ///   tmesh trust --seed <hex> --target https://example.com --value -1 --item
    Trust {
        /// 64-character hex seed of the signing key.
        #[arg(long, env = "TRUSTMESH_SEED", hide_env_values = true, value_name = "HEX")]
        seed: String,

        /// Public key (or item identifier with `--item`) being assessed.
        #[arg(long, value_name = "ID")]
        target: String,

        /// 1 to trust, -1 to distrust, 0 to retract.
        #[arg(long, allow_hyphen_values = true, value_name = "1|0|-1")]
        value: TrustValue,

        /// The target is an item rather than a key.
        #[arg(long)]
        item: bool,
    },

    /// Print the trust score of TARGET from VIEWER's point of view.
    ///
    /// Pass `-` as FILE to read events from stdin.
    Score {
        /// Public key whose web of trust is used.
        #[arg(long, value_name = "PUBKEY")]
        viewer: String,

        /// Identity being scored.
        #[arg(long, value_name = "ID")]
        target: String,

        /// Path to a JSON file of events, or `-` for stdin.
        file: PathBuf,
    },

    /// Ingest events and print the resulting graph snapshot.
    ///
    /// With `--db` (or `TRUSTMESH_DB`) the full engine snapshot is also
    /// written to that SQLite database.
    Snapshot {
        /// Path to a JSON file of events, or `-` for stdin.
        file: PathBuf,

        /// SQLite database to persist the snapshot into.
        #[arg(long, env = "TRUSTMESH_DB", value_name = "PATH")]
        db: Option<String>,

        /// Seed of the viewing identity. A fresh key is used when absent.
        #[arg(long, env = "TRUSTMESH_SEED", hide_env_values = true, value_name = "HEX")]
        seed: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trustmesh_engine=info,tmesh=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Keygen => {
            let keys = Keypair::generate();
            println!("seed:   {}", keys.seed_hex());
            println!("pubkey: {}", keys.public_key());
        }

        Command::Trust {
            seed,
            target,
            value,
            item,
        } => {
            let keys = keypair(&seed);
            let entity_type = if item { EntityType::Item } else { EntityType::Key };
            let draft = draft_assertion("", &target, value, entity_type);
            let event = keys
                .sign(draft)
                .unwrap_or_else(|e| fatal(&format!("signing failed: {e}")));

            // Refuse to print something every reader would discard.
            if let Err(e) = trustmesh::TrustAssertion::from_event(&event) {
                fatal(&format!("assertion is invalid: {e}"));
            }
            let json = serde_json::to_string_pretty(&event)
                .unwrap_or_else(|e| fatal(&format!("failed to encode event: {e}")));
            println!("{json}");
        }

        Command::Score {
            viewer,
            target,
            file,
        } => {
            let events = load_events(&file);
            let registry = Arc::new(Registry::new());
            let mut graph = TrustGraph::new(Arc::clone(&registry));
            graph.set_viewer(registry.intern(&viewer));
            for event in &events {
                let uid = registry.intern(&event.id);
                graph.ingest(event, uid);
            }
            info!(events = events.len(), edges = graph.len(), "graph built");
            print!("{}", render_score(&graph, &target, &viewer));
        }

        Command::Snapshot { file, db, seed } => {
            let keys = seed.as_deref().map_or_else(Keypair::generate, keypair);
            let events = load_events(&file);

            let engine = Engine::start(
                EngineConfig::from_env(),
                Arc::new(MemoryRelay::new()),
                Arc::new(keys),
            );
            for event in events {
                engine.ingest(event);
            }
            print!("{}", render_snapshot(&engine.trust().snapshot()));

            if let Some(path) = db {
                let store = SqliteSnapshotStore::open(&path).unwrap_or_else(|e| {
                    fatal(&format!("failed to open SQLite database at {path}: {e}"))
                });
                engine
                    .persist(&store)
                    .await
                    .unwrap_or_else(|e| fatal(&format!("failed to persist snapshot: {e}")));
                info!("snapshot written to {path}");
            }
            engine.dispose();
        }
    }
}

fn keypair(seed: &str) -> Keypair {
    Keypair::from_seed_hex(seed).unwrap_or_else(|e| fatal(&format!("invalid --seed: {e}")))
}

/// Read the full contents of a file, or stdin when the path is `"-"`.
fn read_input(path: &PathBuf) -> String {
    if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .unwrap_or_else(|e| fatal(&format!("failed to read stdin: {e}")));
        buf
    } else {
        fs::read_to_string(path)
            .unwrap_or_else(|e| fatal(&format!("failed to read {}: {e}", path.display())))
    }
}

/// Parse events from `path` and keep the structurally valid ones.
fn load_events(path: &PathBuf) -> Vec<Event> {
    let json = read_input(path);
    let events = match serde_json::from_str::<Vec<Event>>(&json) {
        Ok(events) => events,
        Err(_) => match serde_json::from_str::<Event>(&json) {
            Ok(event) => vec![event],
            Err(e) => fatal(&format!("failed to parse input as events: {e}")),
        },
    };

    let total = events.len();
    let valid: Vec<Event> = events
        .into_iter()
        .filter(|event| match validate_event(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %event.id, "skipping invalid event: {e}");
                false
            }
        })
        .collect();
    if valid.len() < total {
        warn!("{} of {total} events skipped", total - valid.len());
    }
    valid
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("tmesh: {msg}");
    process::exit(2);
}
