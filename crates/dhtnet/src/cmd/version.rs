use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("dhtnet {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: dhtnet");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("DHTNET_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("protocol: {}", dhtnet_net::DEFAULT_PROTOCOL);
    println!(
        "max_message_size: {}",
        dhtnet_frame::DEFAULT_MAX_MESSAGE_SIZE
    );
    println!("transports: tcp, memory");

    Ok(SUCCESS)
}
