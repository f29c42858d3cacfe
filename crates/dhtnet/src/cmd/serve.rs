use std::sync::Arc;

use dhtnet_frame::{Message, MessageType};
use dhtnet_net::{handler_fn, MessageStats, Node, NodeConfig};
use dhtnet_transport::{PeerId, TcpDialer, TcpTransport};
use tracing::{debug, info};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let local = PeerId::new(&args.peer_id);
    let mut config = NodeConfig {
        read_timeout: parse_duration(&args.read_timeout)?,
        ..NodeConfig::default()
    };
    if let Some(max) = args.max_message_size {
        config.frame.max_message_size = max;
    }

    let transport = TcpTransport::bind(&args.listen, local.clone(), config.protocols.clone())
        .await
        .map_err(|err| transport_error("bind failed", err))?;
    let addr = transport.local_addr();
    let dialer = Arc::new(TcpDialer::new(&local, config.protocols.clone()));
    let protocols = config.protocols.clone();
    let stats = Arc::new(MessageStats::new());

    let node = Node::builder(local.clone(), dialer)
        .with_config(config)
        .with_metrics(stats.clone())
        .with_handler(MessageType::PING, handler_fn(echo))
        .with_handler(MessageType::PUT_VALUE, handler_fn(sink))
        .build();
    let serving = node.serve(transport);
    print_listening(&local, addr, &protocols, format);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("signal handler setup failed", &err))?;
            info!("interrupt received; shutting down");
        }
        _ = serving => info!("listener closed"),
    }
    node.close();

    for (msg_type, totals) in stats.snapshot_all() {
        info!(
            %msg_type,
            received = totals.received,
            answered = totals.handled,
            mean_handling_us = totals.mean_handling_time().map(|d| d.as_micros() as u64),
            "message totals"
        );
    }
    Ok(SUCCESS)
}

async fn echo(peer: PeerId, request: Message) -> Result<Option<Message>, dhtnet_net::HandlerError> {
    debug!(%peer, size = request.size(), "ping");
    Ok(Some(request))
}

async fn sink(peer: PeerId, request: Message) -> Result<Option<Message>, dhtnet_net::HandlerError> {
    info!(%peer, size = request.payload().len(), "value received");
    Ok(None)
}
