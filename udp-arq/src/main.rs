//! Entry point for `udp-arq`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode of the file-transfer application.  All protocol work is delegated to
//! the library; `main.rs` owns only process setup (logging, argument parsing).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use udp_arq::transfer::{get_file, put_file, serve};
use udp_arq::{Config, Protocol, SimulatorConfig};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Reliability strategy (stop-and-wait | selective-repeat).
    #[arg(short, long, global = true, default_value_t = Protocol::SelectiveRepeat)]
    proto: Protocol,

    /// Drop this fraction of outgoing datagrams (testing aid).
    #[arg(long, global = true, default_value_t = 0.0)]
    loss: f64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve files from a directory.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:2000")]
        bind: SocketAddr,
        /// Directory files are served from and stored into.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Upload and/or download a file.
    Client {
        /// Remote server address (e.g. 127.0.0.1:2000).
        #[arg(long)]
        server: SocketAddr,
        /// Local file to upload.
        #[arg(short, long)]
        send: Option<PathBuf>,
        /// Remote file to download into the working directory.
        #[arg(short, long)]
        get: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mut config = Config::default();
    if cli.loss > 0.0 {
        config = config.with_simulator(SimulatorConfig::lossy(cli.loss, rand::random()));
    }

    match cli.mode {
        Mode::Server { bind, dir } => {
            let dir = dir
                .canonicalize()
                .with_context(|| format!("serving directory {}", dir.display()))?;
            let server = cli.proto.server(config);
            server.bind(bind).await?;
            log::info!("[fts] {} server on {bind}, serving {}", cli.proto, dir.display());
            serve(&*server, dir).await?;
        }
        Mode::Client { server, send, get } => {
            if send.is_none() && get.is_none() {
                bail!("nothing to do: pass --send <file> and/or --get <name>");
            }
            let client = cli.proto.client(config);
            client.connect(server).await?;

            if let Some(name) = get {
                let started = Instant::now();
                let dest = PathBuf::from(
                    std::path::Path::new(&name)
                        .file_name()
                        .with_context(|| format!("invalid file name {name}"))?,
                );
                let len = get_file(&*client, &name, &dest).await?;
                log::info!("File transfer took {:?} ({len} bytes).", started.elapsed());
            }

            if let Some(path) = send {
                let started = Instant::now();
                let len = put_file(&*client, &path).await?;
                log::info!("File transfer took {:?} ({len} bytes).", started.elapsed());
            }
        }
    }
    Ok(())
}
