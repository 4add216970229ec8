//! # scribe
//!
//! Command-line front end: runs chat turns against an agent runtime, streams
//! the relay as JSON lines on stdout, and inspects stored sessions.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use scribe_core::{AgentRuntime, Session, SessionId};
use scribe_engine::{ChatRequest, FirstLineTitler, JsonLinesRuntime, Reconciler, SessionGate};
use scribe_relay::{create_bridge, RelayHub, StreamRelay};
use scribe_settings::{scribe_home, ScribeSettings};
use scribe_store::{Database, RunLeases, SessionStore, SqliteSessionStore};
use scribe_telemetry::{init_telemetry, parse_level, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "scribe", about = "Streaming session reconciliation for agent runtimes")]
struct Cli {
    /// Path to the SQLite database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one prompt and stream relay events as JSON lines.
    Chat {
        prompt: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,

        /// Title for a new session.
        #[arg(long)]
        title: Option<String>,

        /// Replay recorded runtime events from a file instead of running an agent.
        #[arg(long, conflicts_with = "command")]
        replay: Option<PathBuf>,

        /// Agent program to run (defaults to engine.runtimeCommand).
        #[arg(long)]
        command: Option<String>,

        /// Arguments for the agent program, after `--`.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// List sessions, most recently updated first.
    List,
    /// Print one session as JSON.
    Show { id: String },
    /// Find sessions by title, message text or tool usage.
    Search { term: String },
    /// Change a session's title.
    Rename { id: String, title: String },
    /// Delete a session.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = scribe_settings::load_settings().context("Failed to load settings")?;

    init_telemetry(TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(tracing::Level::INFO),
        json: settings.logging.json,
        ..TelemetryConfig::default()
    })
    .context("Failed to initialize telemetry")?;

    let db_path = cli.db_path.clone().unwrap_or_else(|| database_path(&settings));
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let sqlite = Arc::new(SqliteSessionStore::new(db));
    let store: Arc<dyn SessionStore> = sqlite.clone();

    match cli.command {
        Command::Chat {
            prompt,
            session,
            title,
            replay,
            command,
            args,
        } => {
            let runtime: Arc<dyn AgentRuntime> = match (replay, command) {
                (Some(path), _) => Arc::new(JsonLinesRuntime::replay(path)),
                (None, Some(program)) => Arc::new(JsonLinesRuntime::command(program, args)),
                (None, None) => Arc::new(JsonLinesRuntime::command(
                    settings.engine.runtime_command.clone(),
                    settings.engine.runtime_args.clone(),
                )),
            };
            chat(&settings, store, sqlite, runtime, prompt, session, title).await
        }
        Command::List => {
            print_sessions(&store.list().context("Failed to list sessions")?);
            Ok(())
        }
        Command::Show { id } => {
            let session = store
                .get(&SessionId::from_raw(id.clone()))
                .with_context(|| format!("Failed to load session {id}"))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(())
        }
        Command::Search { term } => {
            print_sessions(&store.search(&term).context("Search failed")?);
            Ok(())
        }
        Command::Rename { id, title } => {
            store
                .rename(&SessionId::from_raw(id.clone()), &title)
                .with_context(|| format!("Failed to rename session {id}"))?;
            println!("renamed {id}");
            Ok(())
        }
        Command::Delete { id } => {
            if store.delete(&SessionId::from_raw(id.clone()))? {
                println!("deleted {id}");
                Ok(())
            } else {
                bail!("session {id} not found")
            }
        }
    }
}

async fn chat(
    settings: &ScribeSettings,
    store: Arc<dyn SessionStore>,
    leases: Arc<dyn RunLeases>,
    runtime: Arc<dyn AgentRuntime>,
    prompt: String,
    session: Option<String>,
    title: Option<String>,
) -> Result<()> {
    // Resolve the session up front so the subscriber can be registered
    // before the first event is emitted.
    let session_id = match session {
        Some(id) => {
            let id = SessionId::from_raw(id);
            store
                .get(&id)
                .with_context(|| format!("Failed to load session {id}"))?
                .id
        }
        None => store.create(title.as_deref()).context("Failed to create session")?.id,
    };

    // Held for the whole run; another `scribe chat` on this session, in any
    // process, is refused until it is dropped.
    let gate = SessionGate::new(leases, Duration::from_secs(settings.engine.run_lease_secs));
    let _permit = gate
        .try_acquire(&session_id)
        .with_context(|| format!("Failed to claim session {session_id}"))?;

    let relay = Arc::new(StreamRelay::new(settings.relay.channel_capacity));
    let hub = Arc::new(RelayHub::new(settings.relay.subscriber_queue));
    let bridge = create_bridge(Arc::clone(&hub), relay.subscribe());
    let (subscriber, mut lines) = hub.subscribe(session_id.clone());

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
            {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let mut reconciler = Reconciler::new(Arc::clone(&store), runtime, relay);
    if settings.engine.generate_titles {
        reconciler =
            reconciler.with_titler(Arc::new(FirstLineTitler::new(settings.engine.title_max_chars)));
    }

    let outcome = reconciler
        .run(ChatRequest::new(prompt).in_session(session_id), &cancel)
        .await?;

    if let Some(task) = outcome.title_task {
        let _ = task.await;
    }

    // Closing the relay ends the bridge; dropping the subscriber ends the printer.
    drop(reconciler);
    let _ = bridge.await;
    hub.unsubscribe(&subscriber);
    let _ = printer.await;

    if !outcome.persisted && outcome.message.is_some() {
        bail!("assistant message for session {} was not saved", outcome.session_id);
    }
    if let Some(reason) = outcome.error {
        bail!("{reason}");
    }
    Ok(())
}

fn database_path(settings: &ScribeSettings) -> PathBuf {
    if settings.store.database_path.is_empty() {
        scribe_home().join("scribe.db")
    } else {
        PathBuf::from(&settings.store.database_path)
    }
}

fn print_sessions(sessions: &[Session]) {
    for s in sessions {
        println!(
            "{}\t{}\t{}\t{} messages",
            s.id,
            s.updated_at.format("%Y-%m-%d %H:%M"),
            s.title,
            s.messages.len()
        );
    }
}
