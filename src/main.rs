//! devrelay — development message relay
//!
//! Lets a running app and any number of debugging tools talk to each other
//! through one WebSocket endpoint. Every client gets an identity; messages are
//! broadcast, answered by the relay itself, or forwarded peer to peer.
//!
//! Usage:
//!   devrelay                                   # Default port 8081, path /message
//!   devrelay --port 9090                       # Custom port
//!   devrelay --watch-folder ~/src/app          # Project root for editor launches
//!   devrelay --editor "code --reuse-window"    # Editor for /open-stack-frame

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use devrelay_server::Relay;
use devrelay_transport::{
    ProcessEditorLauncher, RelayControl, RelayHandler, TransportConfig, TransportServer,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devrelay", about = "devrelay — development message relay")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "8081")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// URL path that upgrades to the relay WebSocket
    #[arg(long, default_value = "/message")]
    path: String,

    /// URL path of the editor-launch endpoint
    #[arg(long, default_value = "/open-stack-frame")]
    editor_path: String,

    /// Project root passed to the editor (repeatable)
    #[arg(long = "watch-folder")]
    watch_folders: Vec<PathBuf>,

    /// Editor command (defaults to $REACT_EDITOR, $VISUAL, then $EDITOR)
    #[arg(long)]
    editor: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) -> Result<(), std::io::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

/// Turn single-key commands typed into the terminal into server broadcasts.
/// Stops reading at EOF (e.g. stdin is `/dev/null`) without shutting down.
async fn forward_key_commands<H: RelayHandler>(control: RelayControl<H>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "r" => {
                info!("Reloading connected apps");
                control.server_broadcast("reload", None);
            }
            "d" => {
                info!("Opening the dev menu on connected apps");
                control.server_broadcast("devMenu", None);
            }
            "" => {}
            other => warn!("Unknown command `{other}` (r = reload, d = dev menu)"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Failed to open log file: {e}");
        std::process::exit(1);
    }

    let watch_folders: Vec<PathBuf> = cli
        .watch_folders
        .iter()
        .map(|w| w.canonicalize().unwrap_or_else(|_| w.clone()))
        .collect();

    let config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        message_path: cli.path.clone(),
        editor_path: cli.editor_path.clone(),
        watch_folders: watch_folders.clone(),
    };

    let relay = Arc::new(Relay::new());
    let launcher = Arc::new(ProcessEditorLauncher::new(cli.editor.clone()));

    let mut transport = match TransportServer::start(config, relay, launcher).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    let port = transport.port();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                          devrelay                           ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Relay:      ws://{}:{port}{}", cli.hostname, cli.path);
    println!("  Editor:     http://{}:{port}{}", cli.hostname, cli.editor_path);
    println!("  Status:     http://{}:{port}/status", cli.hostname);
    if watch_folders.is_empty() {
        println!("  Watching:   (none)");
    } else {
        for folder in &watch_folders {
            println!("  Watching:   {}", folder.display());
        }
    }
    println!();
    println!("  Press r + Enter to reload apps, d + Enter for the dev menu.");
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::spawn(forward_key_commands(transport.control()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    println!();
    println!("  Shutting down...");
    transport.stop().await;
    println!("  Server stopped.");
}
