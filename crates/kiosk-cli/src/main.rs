use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod backend;
mod commands;
mod config;
mod formatters;
mod routing;

use commands::account::CardAction;
use commands::issue::{parse_credential, IssueRequest};
use config::{BackendArgs, ReaderArgs};
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "kiosk")]
#[command(about = "Hotel kiosk NFC reader - read, issue, erase and inspect guest cards")]
#[command(version)]
struct Args {
    /// Output format mode
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human, global = true)]
    format: FormatMode,

    #[command(flatten)]
    reader: ReaderArgs,

    #[command(flatten)]
    backend: BackendArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for card taps and print each session
    Poll {
        /// Stop after the first card
        #[arg(long)]
        once: bool,
    },
    /// Read the token and CVC from one card
    Read {
        /// Seconds to wait for a card
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Write new credentials to a card and register the guest
    Write {
        /// Token to write, at most 16 bytes (random when omitted)
        #[arg(long, value_parser = parse_credential)]
        token: Option<String>,
        /// CVC to write, at most 16 bytes (random when omitted)
        #[arg(long, value_parser = parse_credential)]
        cvc: Option<String>,
        /// Guest full name
        #[arg(long)]
        name: Option<String>,
        /// Room or location of the guest
        #[arg(long)]
        room: Option<String>,
        /// Only write the card, skip backend activation
        #[arg(long)]
        no_register: bool,
        /// Seconds to wait for a card
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Wipe the token and CVC from a card (keys and access bits are kept)
    Erase {
        /// Also deactivate the card with the backend before wiping it
        #[arg(long)]
        deactivate: bool,
        /// Seconds to wait for a card
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Show sector trailers and access conditions
    Inspect {
        /// Sectors to inspect (all when omitted)
        #[arg(short, long)]
        sector: Vec<u8>,
        /// Seconds to wait for a card
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Read a card and perform a guest action with it
    Card {
        #[arg(value_enum)]
        action: CardAction,
        /// Seconds to wait for a card
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Show reader configuration, PC/SC readers and the key dictionary
    Info,
}

fn main() {
    // Initialize tracing subscriber with environment-based filtering
    // Set RUST_LOG=debug for detailed logs, RUST_LOG=trace for very verbose
    // Default: info level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let format_mode = args.format;

    let backend = match args.backend.client() {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("Failed to set up backend client: {}", err);
            return;
        }
    };

    match args.command {
        Command::Poll { once } => {
            commands::poll::cmd_poll(&args.reader, backend.as_ref(), once, format_mode)
        }
        Command::Read { wait } => commands::read::cmd_read(
            &args.reader,
            backend.as_ref(),
            Duration::from_secs(wait),
            format_mode,
        ),
        Command::Write {
            token,
            cvc,
            name,
            room,
            no_register,
            wait,
        } => commands::issue::cmd_issue(
            &args.reader,
            backend.as_ref(),
            IssueRequest {
                token,
                cvc,
                name,
                room,
                register: !no_register,
            },
            Duration::from_secs(wait),
            format_mode,
        ),
        Command::Erase { deactivate, wait } => commands::erase::cmd_erase(
            &args.reader,
            backend.as_ref(),
            deactivate,
            Duration::from_secs(wait),
            format_mode,
        ),
        Command::Inspect { sector, wait } => commands::inspect::cmd_inspect(
            &args.reader,
            &sector,
            Duration::from_secs(wait),
            format_mode,
        ),
        Command::Card { action, wait } => commands::account::cmd_card_action(
            &args.reader,
            backend.as_ref(),
            action,
            Duration::from_secs(wait),
            format_mode,
        ),
        Command::Info => commands::info::cmd_info(&args.reader, format_mode),
    }
}
