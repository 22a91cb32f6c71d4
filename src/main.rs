//! # PersonaPlex CLI (`plex`)
//!
//! ## Usage
//!
//! ```bash
//! plex --config ./config/plex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `plex init` | Create the SQLite database and run schema migrations |
//! | `plex classify "<question>"` | Print the intent category of a question |
//! | `plex upload --owner <o> <path>` | Attach a document to a session (new session unless `--session`) |
//! | `plex ask --owner <o> "<question>"` | Answer one question |
//! | `plex chat --owner <o>` | Interactive loop reading questions from stdin |
//! | `plex sessions list --owner <o>` | List sessions, newest first |
//! | `plex sessions show <id>` | Print a session's history |
//! | `plex sessions last <id>` | Print the latest answer of a session |
//! | `plex sessions delete --owner <o> <id>` | Delete a session and its document |
//!
//! ## Examples
//!
//! ```bash
//! plex init
//! plex upload --owner alice ./contract.pdf
//! plex ask --owner alice --session <id> "What is the notice period?"
//! plex ask --owner alice --session <id> "Summarize this document" --json
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use personaplex::chat::{ChatService, TurnReply};
use personaplex::config::{self, DEFAULT_CONFIG_PATH};
use personaplex::migrate;
use personaplex_core::models::UNTITLED_SESSION;
use personaplex_core::router::classify;

/// PersonaPlex: ask questions about your documents.
///
/// All commands except `classify` read a TOML configuration file. See
/// `config/plex.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "plex",
    about = "PersonaPlex: document Q&A with intent routing and per-session history",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Print the intent category of a question.
    Classify {
        question: String,
    },

    /// Attach a document (pdf, txt, csv) to a session.
    ///
    /// Replaces the session's previous document. Without `--session` a new
    /// session is created.
    Upload {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        session: Option<String>,
        path: PathBuf,
        /// Print the upload report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a single question.
    Ask {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        session: Option<String>,
        question: String,
        /// Print the full turn reply as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Read questions from stdin, one per line, until EOF or `exit`.
    Chat {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        session: Option<String>,
    },

    /// Inspect and manage chat sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List an owner's sessions, newest first.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Print a session's turns in order.
    Show { id: String },
    /// Print the latest answer of a session.
    Last { id: String },
    /// Delete a session with its history and document.
    Delete {
        #[arg(long)]
        owner: String,
        id: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "personaplex=debug"
    } else {
        "personaplex=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_reply(reply: &TurnReply, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reply)?);
    } else {
        println!("{}", reply.answer);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Classify { question } = &cli.command {
        println!("{}", classify(question));
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let chat = ChatService::from_config(&cfg).await?;

    match cli.command {
        Commands::Upload {
            owner,
            session,
            path,
            json,
        } => {
            let report = chat.upload(&owner, session.as_deref(), &path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("session: {}", report.session_id);
                println!(
                    "document: {} ({} chunks, {})",
                    report.file_name,
                    report.chunks,
                    if report.indexed { "indexed" } else { "not indexed" }
                );
                if let Some(diagnostic) = &report.degraded {
                    println!("warning: {}", diagnostic);
                }
            }
        }
        Commands::Ask {
            owner,
            session,
            question,
            json,
        } => {
            let reply = chat.ask(&owner, session.as_deref(), &question).await?;
            if !json {
                eprintln!("session: {}", reply.session_id);
            }
            print_reply(&reply, json)?;
        }
        Commands::Chat { owner, session } => {
            run_chat(&chat, &owner, session).await?;
        }
        Commands::Sessions { action } => match action {
            SessionAction::List { owner } => {
                let sessions = chat.list_sessions(&owner).await?;
                if sessions.is_empty() {
                    println!("No sessions.");
                }
                for s in sessions {
                    println!(
                        "{}  {}  {}",
                        s.id,
                        s.created_at.format("%Y-%m-%d %H:%M"),
                        s.title
                    );
                }
            }
            SessionAction::Show { id } => {
                let session = chat.session(&id).await?;
                println!("Session: {}", session.id);
                println!("Title:   {}", session.title.as_deref().unwrap_or(UNTITLED_SESSION));
                println!("Owner:   {}", session.owner);
                println!("Created: {}", session.created_at.to_rfc3339());
                if let Some(doc) = chat.document(&session.owner, &session.id).await? {
                    println!("Document: {}", doc.file_name);
                }
                println!();
                for turn in &session.turns {
                    println!("[{}] {}", turn.role, turn.content);
                }
            }
            SessionAction::Last { id } => match chat.last_answer(&id).await? {
                Some(answer) => println!("{}", answer),
                None => println!("No answer yet."),
            },
            SessionAction::Delete { owner, id } => {
                if chat.delete_session(&owner, &id).await? {
                    println!("Deleted session {}", id);
                } else {
                    anyhow::bail!("Session not found: {}", id);
                }
            }
        },
        Commands::Classify { .. } | Commands::Init => {
            // Handled above
        }
    }

    Ok(())
}

async fn run_chat(chat: &ChatService, owner: &str, mut session: Option<String>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        let reply = chat.ask(owner, session.as_deref(), question).await?;
        session = Some(reply.session_id.clone());
        writeln!(stdout, "{}\n", reply.answer)?;
        stdout.flush()?;
    }

    if let Some(id) = session {
        eprintln!("session: {}", id);
    }
    Ok(())
}
