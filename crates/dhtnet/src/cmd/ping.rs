use std::sync::Arc;
use std::time::Instant;

use dhtnet_frame::{Message, MessageType};
use dhtnet_net::{Node, NodeConfig};
use dhtnet_transport::{PeerId, TcpDialer};
use tokio_util::sync::CancellationToken;

use crate::cmd::{parse_duration, DialArgs, PingArgs};
use crate::exit::{net_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_ping_report, OutputFormat, PingSample};

pub async fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }
    let client = Client::connect(&args.dial)?;
    let ctx = client.cancel_on_interrupt();

    let mut samples = Vec::with_capacity(args.count as usize);
    for seq in 1..=args.count {
        let payload = args.data.clone().unwrap_or_else(|| format!("ping-{seq}"));
        let request = Message::new(MessageType::PING, payload);

        let started = Instant::now();
        let reply = client
            .node
            .send_request(&ctx, &client.remote, &request)
            .await
            .map_err(|err| net_error("ping failed", err))?;
        let rtt = started.elapsed();

        if reply != request {
            return Err(CliError::new(
                DATA_INVALID,
                format!("ping {seq}: reply does not echo the request"),
            ));
        }
        samples.push(PingSample {
            seq,
            size: reply.size(),
            rtt,
        });
    }

    print_ping_report(&client.remote, &samples, client.dialer.dial_count(), format);
    Ok(SUCCESS)
}

/// A single-peer client node over TCP.
pub(crate) struct Client {
    pub node: Node,
    pub dialer: Arc<TcpDialer>,
    pub remote: PeerId,
}

impl Client {
    pub fn connect(args: &DialArgs) -> CliResult<Self> {
        let local = PeerId::new(&args.peer_id);
        let remote = PeerId::new(&args.peer);
        let config = NodeConfig {
            read_timeout: parse_duration(&args.timeout)?,
            ..NodeConfig::default()
        };

        let dialer = Arc::new(TcpDialer::new(&local, config.protocols.clone()));
        dialer.add_address(remote.clone(), args.addr);
        let node = Node::builder(local, dialer.clone())
            .with_config(config)
            .build();
        Ok(Self {
            node,
            dialer,
            remote,
        })
    }

    /// A token cancelled on Ctrl-C.
    pub fn cancel_on_interrupt(&self) -> CancellationToken {
        let ctx = CancellationToken::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        ctx
    }
}
