use std::{
    io::{stderr, IsTerminal},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    data::{DocumentStatus, UploadEntry},
    payloads::DocumentStats,
};
use docchat_client::{
    controller::{UploadConfig, UploadController},
    render::{print_documents, print_entries, print_stats, render},
    store::{FileStore, SessionStore, DEFAULT_SESSION_MAX_AGE_MS},
    validate::{FileValidator, DEFAULT_EXTENSIONS, DEFAULT_MAX_FILE_SIZE},
    DocumentBackend, HttpBackend,
};
use kdam::term;
use tokio::{select, signal, spawn};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Upload documents to DocChat and follow their processing", long_about = None)]
struct Args {
    #[arg(short, long, env = "DOCCHAT_API_URL", default_value = "http://127.0.0.1:8000")]
    pub base_url: String,

    /// Bearer token for the API
    #[arg(long, env = "DOCCHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// The authenticated user; sessions of other users are never resumed
    #[arg(long, env = "DOCCHAT_USER_ID")]
    pub user_id: String,

    /// Where the upload session is kept between runs
    #[arg(long, env = "DOCCHAT_STATE_DIR", default_value = ".docchat")]
    pub state_dir: PathBuf,

    #[arg(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = DEFAULT_SESSION_MAX_AGE_MS)]
    pub session_max_age_ms: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Upload files and wait until they are processed
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Pick up a previous session and wait for what is still in flight
    Resume,
    /// Show the persisted session without contacting the backend
    Status,
    /// List your documents on the backend
    List,
    /// Forget one finished entry
    Remove { entry_id: String },
    /// Forget completed entries; refused while uploads are in flight
    ClearCompleted,
    /// Forget everything and delete the persisted session
    Clear,
}

impl Args {
    fn config(&self) -> UploadConfig {
        UploadConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            session_max_age: Duration::from_millis(self.session_max_age_ms),
            validator: FileValidator::new(
                self.max_file_size,
                DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ),
        }
    }

    fn backend(&self) -> Result<HttpBackend> {
        let token = self
            .token
            .clone()
            .context("a bearer token is required; pass --token or set DOCCHAT_TOKEN")?;
        Ok(HttpBackend::new(&self.base_url, token)?)
    }
}

type Controller = UploadController<HttpBackend, FileStore>;

/// Renders until nothing is in flight. The first Ctrl-C while uploads are
/// running only saves the session; the second one leaves.
async fn run_until_idle(controller: &Controller, tty: bool) -> Result<()> {
    let token = CancellationToken::new();
    let renderer = spawn(render(controller.subscribe(), token.clone(), tty));
    let mut warned = false;
    loop {
        select! {
            _ = controller.wait_idle() => break,
            r = signal::ctrl_c() => {
                r?;
                if controller.should_block_exit().await && !warned {
                    controller.persist_now().await;
                    eprintln!(
                        "Uploads are still in progress. Press Ctrl-C again to leave anyway; \
                         `docchat-upload resume` picks them up later."
                    );
                    warned = true;
                } else {
                    break;
                }
            }
        }
    }
    token.cancel();
    let _ = renderer.await;
    controller.teardown().await;

    let entries = controller.snapshot().await.entries;
    summarize(&entries)
}

fn summarize(entries: &[UploadEntry]) -> Result<()> {
    let failed = entries
        .iter()
        .filter(|e| e.status() == DocumentStatus::Error)
        .count();
    let in_flight = entries.iter().filter(|e| e.is_in_flight()).count();
    if in_flight > 0 {
        eprintln!("{in_flight} upload(s) still in flight; their state has been saved.");
    }
    if failed > 0 {
        bail!("{failed} of {} upload(s) failed", entries.len());
    }
    Ok(())
}

async fn mount(controller: &Controller) -> bool {
    let recovered = controller.mount().await;
    if recovered {
        eprintln!("Recovered your previous upload session.");
        controller.dismiss_recovery_notice().await;
    }
    recovered
}

fn status(store: &FileStore) {
    let sessions = SessionStore::new(store.clone());
    println!(
        "uploads in progress: {}",
        if sessions.in_flight() { "yes" } else { "no" }
    );
    match sessions.load() {
        Some(session) => {
            println!("session {} (user {})", session.session_id, session.user_id);
            print_entries(&session.files);
        }
        None => println!("no saved upload session"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let is_tty = stderr().is_terminal();
    term::init(is_tty);
    let args = Args::parse();

    let store = FileStore::new(&args.state_dir);
    match &args.command {
        Command::Status => {
            status(&store);
            return Ok(());
        }
        Command::Clear => {
            SessionStore::new(store).clear();
            eprintln!("Upload session cleared.");
            return Ok(());
        }
        Command::List => {
            let documents = args.backend()?.list_documents(&args.user_id).await?;
            print_documents(&documents);
            print_stats(&DocumentStats::from_records(&documents));
            return Ok(());
        }
        _ => {}
    }

    let controller = UploadController::new(
        Arc::new(args.backend()?),
        store,
        args.user_id.clone(),
        args.config(),
    );

    match args.command {
        Command::Upload { files } => {
            mount(&controller).await;
            let (ids, rejected) = controller.add_files(files).await;
            for r in &rejected {
                eprintln!("Skipping {}: {}", r.path.display(), r.reason);
            }
            if ids.is_empty() && !controller.should_block_exit().await {
                bail!("nothing to upload");
            }
            run_until_idle(&controller, is_tty).await
        }
        Command::Resume => {
            if !mount(&controller).await {
                eprintln!("No upload session to recover.");
                return Ok(());
            }
            run_until_idle(&controller, is_tty).await
        }
        Command::Remove { entry_id } => {
            mount(&controller).await;
            let result = controller.remove_entry(&entry_id).await;
            controller.teardown().await;
            result?;
            eprintln!("Removed {entry_id}.");
            Ok(())
        }
        Command::ClearCompleted => {
            mount(&controller).await;
            let result = controller.clear_completed().await;
            controller.teardown().await;
            eprintln!("Cleared {} completed upload(s).", result?);
            Ok(())
        }
        Command::Status | Command::Clear | Command::List => Ok(()),
    }
}
