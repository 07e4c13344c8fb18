//! Entry point for `lossy-arq`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, configuration, argument parsing, reporting).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use lossy_arq::{Channel, ImpairmentConfig, RandomFaults, SessionStats};

const DEFAULT_SENDER_PORT: u16 = 9876;
const DEFAULT_RECEIVER_PORT: u16 = 4321;

/// Go-Back-N reliable delivery over an impaired UDP channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send payloads reliably to a receiver.
    Send {
        /// Local UDP port to bind.
        #[arg(short, long, default_value_t = DEFAULT_SENDER_PORT)]
        port: u16,
        /// Receiver address.
        #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_RECEIVER_PORT)))]
        to: SocketAddr,
        /// Message repeated `--count` times.
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        message: Option<String>,
        /// Number of copies of `--message` to send.
        #[arg(short, long, default_value_t = 1000)]
        count: usize,
        /// Send each line of this file as one payload.
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        common: Common,
    },
    /// Receive and print payloads until the channel goes quiet.
    Receive {
        /// Local UDP port to bind.
        #[arg(short, long, default_value_t = DEFAULT_RECEIVER_PORT)]
        port: u16,
        /// Stop after this long without traffic.
        #[arg(long, default_value_t = 10_000)]
        idle_timeout_ms: u64,
        /// Do not print delivered payloads.
        #[arg(short, long)]
        quiet: bool,
        #[command(flatten)]
        common: Common,
    },
}

#[derive(Args)]
struct Common {
    /// Impairment configuration (JSON).  A clean channel is used if absent.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Seed the fault RNG for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
    /// Print the statistics report as JSON.
    #[arg(long)]
    json: bool,
}

impl Common {
    fn load_config(&self) -> Result<ImpairmentConfig> {
        if !self.config.exists() {
            log::warn!(
                "{} not found; running without impairments",
                self.config.display()
            );
            return Ok(ImpairmentConfig::default());
        }
        ImpairmentConfig::load(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))
    }

    async fn open(&self, port: u16) -> Result<Channel> {
        let config = self.load_config()?;
        let faults = match self.seed {
            Some(seed) => RandomFaults::seeded(seed),
            None => RandomFaults::new(),
        };
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        Channel::bind_with_faults(addr, config, Box::new(faults))
            .await
            .with_context(|| format!("binding UDP port {port}"))
    }

    fn report(&self, stats: &SessionStats) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(stats)?);
        } else {
            println!("{stats}");
        }
        Ok(())
    }
}

fn read_lines(path: &Path) -> Result<Vec<Vec<u8>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(text.lines().map(|l| l.as_bytes().to_vec()).collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            port,
            to,
            message,
            count,
            file,
            common,
        } => {
            let payloads = match (message, file) {
                (_, Some(path)) => read_lines(&path)?,
                (Some(message), None) => vec![message.into_bytes(); count],
                (None, None) => bail!("either --message or --file is required"),
            };
            let channel = common.open(port).await?;
            log::info!("Sending {} payload(s) to {to}", payloads.len());
            let stats = channel
                .send_reliable(to, payloads)
                .await
                .with_context(|| format!("sending to {to}"))?;
            common.report(&stats)?;
        }
        Mode::Receive {
            port,
            idle_timeout_ms,
            quiet,
            common,
        } => {
            let channel = common.open(port).await?;
            log::info!("Receiving on {}", channel.local_addr());
            let stats = channel
                .receive_loop(
                    |peer, payload| {
                        if !quiet {
                            println!("{peer}: {}", String::from_utf8_lossy(&payload));
                        }
                    },
                    Duration::from_millis(idle_timeout_ms),
                )
                .await
                .context("receive session failed")?;
            common.report(&stats)?;
        }
    }
    Ok(())
}
