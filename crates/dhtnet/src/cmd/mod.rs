use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use dhtnet_frame::MessageType;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod ping;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve PING and PUT_VALUE requests on a TCP listener.
    Serve(ServeArgs),
    /// Send PING requests to a peer and report round-trip times.
    Ping(PingArgs),
    /// Send a single message to a peer.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Ping(args) => ping::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "DHTNET_LISTEN", default_value = "127.0.0.1:4001")]
    pub listen: String,
    /// Peer id to identify as.
    #[arg(long, env = "DHTNET_PEER_ID", default_value = "dhtnet-server")]
    pub peer_id: String,
    /// How long an inbound stream may sit idle between requests (e.g. 60s).
    #[arg(long, default_value = "60s")]
    pub read_timeout: String,
    /// Largest accepted message body in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,
}

/// Where and who to dial.
#[derive(Args, Debug)]
pub struct DialArgs {
    /// Peer id of the remote node.
    #[arg(long)]
    pub peer: String,
    /// TCP address of the remote node.
    #[arg(long)]
    pub addr: SocketAddr,
    /// Peer id to identify as.
    #[arg(long, env = "DHTNET_PEER_ID", default_value = "dhtnet-client")]
    pub peer_id: String,
    /// Reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    #[command(flatten)]
    pub dial: DialArgs,
    /// Number of requests to send.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u32,
    /// Payload to echo. Default: "ping-<seq>".
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub dial: DialArgs,
    /// Message type: a name (put-value, FIND_NODE) or a numeric tag.
    #[arg(long = "type", short = 't', default_value = "put-value")]
    pub msg_type: MessageType,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for a reply and print it.
    #[arg(long)]
    pub expect_reply: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit_ms) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, 60_000)
    } else {
        (input, 1_000)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(Duration::from_millis(value.saturating_mul(unit_ms)))
}
