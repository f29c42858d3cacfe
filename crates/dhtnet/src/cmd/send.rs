use std::fs;

use dhtnet_frame::Message;
use tracing::debug;

use crate::cmd::ping::Client;
use crate::cmd::SendArgs;
use crate::exit::{io_error, net_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let msg = Message::new(args.msg_type, payload);
    let client = Client::connect(&args.dial)?;
    let ctx = client.cancel_on_interrupt();

    if args.expect_reply {
        let reply = client
            .node
            .send_request(&ctx, &client.remote, &msg)
            .await
            .map_err(|err| net_error("request failed", err))?;
        print_message("reply", &client.remote, &reply, format);
    } else {
        client
            .node
            .send_message(&ctx, &client.remote, &msg)
            .await
            .map_err(|err| net_error("send failed", err))?;
        debug!(peer = %client.remote, msg_type = %msg.msg_type(), "message flushed");
        print_message("sent", &client.remote, &msg, format);
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), &err));
    }
    Ok(Vec::new())
}
