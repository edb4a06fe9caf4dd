//! Drive CLI: list, upload, hash and watch a drive from the terminal
//!
//! Usage:
//!   drive-cli --host <url> --root <id> ls [path]        List a folder
//!   drive-cli --host <url> --root <id> put <local> [remote]  Upload a file
//!   drive-cli --host <url> --root <id> hash <remote>    Print the drive hash
//!   drive-cli --host <url> --root <id> watch            Stream change events
//!
//! The API token is read from `--token` or the `DRIVE_API_TOKEN` environment variable.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drive_fs::{
    ChangeCallback, ChangeSource, DriveConfig, DriveProvider, EntryKind, HashKind, HashProvider,
    Lister, ObjectSource, ProviderConfig, Uploader,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "drive-cli",
    about = "Drive CLI - filesystem access to a channel-backed drive",
    version
)]
struct Cli {
    /// API root (e.g., https://drive.example.com)
    #[arg(long)]
    host: String,
    /// Folder ID used as the filesystem root
    #[arg(long = "root")]
    root_folder_id: String,
    /// API token (falls back to DRIVE_API_TOKEN)
    #[arg(long)]
    token: Option<String>,
    /// Extra provider option, repeatable (e.g., -o chunk_size=64M)
    #[arg(short = 'o', long = "option", value_parser = parse_option)]
    options: Vec<(String, String)>,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a folder
    Ls {
        /// Remote path (default: root)
        #[arg(default_value = "")]
        path: String,
    },
    /// Upload a local file
    Put {
        /// Local file path
        local: String,
        /// Remote destination path (default: local file name)
        remote: Option<String>,
    },
    /// Print the drive-computed hash of a file
    Hash {
        /// Remote file path
        remote: String,
    },
    /// Print changes as they happen until Ctrl-C
    Watch {
        /// Reconnect cadence in seconds once the stream keeps failing
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

fn parse_option(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn build_provider(cli: &Cli) -> Result<DriveProvider> {
    let mut extra: HashMap<String, String> = cli.options.iter().cloned().collect();
    extra.insert("root_folder_id".to_string(), cli.root_folder_id.clone());

    let config = ProviderConfig {
        name: "drive-cli".to_string(),
        host: cli.host.clone(),
        password: cli.token.clone().or_else(|| std::env::var("DRIVE_API_TOKEN").ok()),
        extra,
    };
    let drive = DriveConfig::from_provider_config(&config).context("invalid configuration")?;
    Ok(DriveProvider::new(drive)?)
}

async fn run(cli: Cli) -> Result<()> {
    let provider = build_provider(&cli)?;

    match cli.command {
        Commands::Ls { path } => {
            let mut entries = provider.list(&path).await?;
            entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
            for e in entries {
                let modified = e.modified.map(|m| m.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default();
                let marker = if e.is_dir { "/" } else { "" };
                println!("{:>12}  {:16}  {}{}", e.size, modified, e.name, marker);
            }
        }
        Commands::Put { local, remote } => {
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("cannot open {}", local))?;
            let meta = file.metadata().await?;
            if meta.is_dir() {
                bail!("{} is a directory", local);
            }
            let remote = match remote {
                Some(r) => r,
                None => std::path::Path::new(&local)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .context("local path has no file name")?,
            };
            let mod_time = meta.modified()
                .map(chrono::DateTime::<chrono::Utc>::from)
                .unwrap_or_else(|_| chrono::Utc::now());
            let src = ObjectSource::new(&remote, mod_time, Some(meta.len()));

            let mut reader = tokio::io::BufReader::new(file);
            let obj = provider.put(&mut reader, &src).await?;
            println!("Uploaded {} ({} bytes) id={}", obj.remote(), obj.size(), obj.id());
        }
        Commands::Hash { remote } => {
            let obj = provider.new_object(&remote).await?;
            println!("{}  {}", obj.hash(HashKind::Drive).await?, obj.remote());
        }
        Commands::Watch { interval } => {
            let (poll_tx, poll_rx) = mpsc::channel(1);
            poll_tx.send(Duration::from_secs(interval)).await?;

            let on_change: ChangeCallback = Arc::new(|path: &str, kind: EntryKind| {
                let label = match kind {
                    EntryKind::Object => "file",
                    EntryKind::Directory => "dir ",
                };
                println!("{}  {}", label, path);
            });
            let sub = provider.change_notify(CancellationToken::new(), on_change, poll_rx);

            tokio::signal::ctrl_c().await?;
            drop(poll_tx);
            sub.join().await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
