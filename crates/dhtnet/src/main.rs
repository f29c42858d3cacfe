mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::exit::{CliError, INTERNAL};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "dhtnet", version, about = "DHT messaging transport CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))
        .and_then(|runtime| runtime.block_on(cmd::run(cli.command, format)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping_subcommand() {
        let cli = Cli::try_parse_from([
            "dhtnet",
            "ping",
            "--peer",
            "srv",
            "--addr",
            "127.0.0.1:4001",
            "-n",
            "3",
        ])
        .expect("ping args should parse");

        match cli.command {
            Command::Ping(args) => {
                assert_eq!(args.count, 3);
                assert_eq!(args.dial.peer, "srv");
                assert_eq!(args.dial.addr.port(), 4001);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_send_message_type_by_name_or_tag() {
        for (arg, expected) in [
            ("find-node", dhtnet_frame::MessageType::FIND_NODE),
            ("GET_VALUE", dhtnet_frame::MessageType::GET_VALUE),
            ("42", dhtnet_frame::MessageType(42)),
        ] {
            let cli = Cli::try_parse_from([
                "dhtnet", "send", "--peer", "srv", "--addr", "127.0.0.1:4001", "--type", arg,
            ])
            .expect("send args should parse");
            match cli.command {
                Command::Send(args) => assert_eq!(args.msg_type, expected),
                other => panic!("unexpected command {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "dhtnet",
            "send",
            "--peer",
            "srv",
            "--addr",
            "127.0.0.1:4001",
            "--data",
            "x",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_invalid_address() {
        let err = Cli::try_parse_from(["dhtnet", "ping", "--peer", "srv", "--addr", "nowhere"])
            .expect_err("bad address should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
