use std::io::IsTerminal;
use std::net::SocketAddr;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dhtnet_frame::Message;
use dhtnet_transport::PeerId;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    peer_id: &'a str,
    addr: String,
    protocols: &'a [String],
}

/// Announce a bound listener. Always a single line so scripts can read it.
pub fn print_listening(peer: &PeerId, addr: SocketAddr, protocols: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            event: "listening",
            peer_id: peer.as_str(),
            addr: addr.to_string(),
            protocols,
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "listening peer={} addr={} protocols={}",
                peer,
                addr,
                protocols.join(",")
            );
        }
    }
}

/// One completed ping round trip.
#[derive(Debug, Clone, Serialize)]
pub struct PingSample {
    pub seq: u32,
    pub size: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub rtt: Duration,
}

#[derive(Serialize)]
struct PingReport<'a> {
    peer_id: &'a str,
    count: usize,
    dials: usize,
    samples: &'a [PingSample],
    #[serde(serialize_with = "serialize_opt_millis")]
    mean_rtt: Option<Duration>,
}

pub fn print_ping_report(peer: &PeerId, samples: &[PingSample], dials: usize, format: OutputFormat) {
    let mean_rtt = mean(samples.iter().map(|s| s.rtt));
    match format {
        OutputFormat::Json => print_json(&PingReport {
            peer_id: peer.as_str(),
            count: samples.len(),
            dials,
            samples,
            mean_rtt,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "PEER", "SIZE", "RTT"]);
            for sample in samples {
                table.add_row(vec![
                    sample.seq.to_string(),
                    peer.to_string(),
                    sample.size.to_string(),
                    format!("{:.3} ms", millis(sample.rtt)),
                ]);
            }
            println!("{table}");
            println!("{} requests over {} stream(s)", samples.len(), dials);
        }
        OutputFormat::Pretty => {
            for sample in samples {
                println!(
                    "reply from {}: seq={} size={} rtt={:.3}ms",
                    peer,
                    sample.seq,
                    sample.size,
                    millis(sample.rtt)
                );
            }
            match mean_rtt {
                Some(rtt) => println!(
                    "{} requests, {} stream(s), mean rtt {:.3}ms",
                    samples.len(),
                    dials,
                    millis(rtt)
                ),
                None => println!("0 requests"),
            }
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    event: &'static str,
    peer_id: &'a str,
    msg_type: &'static str,
    tag: u16,
    size: usize,
    payload: String,
}

/// Print a message sent to, or received from, `peer`.
pub fn print_message(event: &'static str, peer: &PeerId, msg: &Message, format: OutputFormat) {
    let msg_type = msg.msg_type();
    match format {
        OutputFormat::Json => print_json(&MessageOutput {
            event,
            peer_id: peer.as_str(),
            msg_type: msg_type.label(),
            tag: msg_type.as_u16(),
            size: msg.size(),
            payload: payload_preview(msg.payload()),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "PEER", "TYPE", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    event.to_string(),
                    peer.to_string(),
                    msg_type.to_string(),
                    msg.size().to_string(),
                    payload_preview(msg.payload()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} peer={} type={} size={} payload={}",
                event,
                peer,
                msg_type,
                msg.size(),
                payload_preview(msg.payload())
            );
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn mean(samples: impl Iterator<Item = Duration>) -> Option<Duration> {
    let (total, count) = samples.fold((Duration::ZERO, 0u32), |(t, n), d| (t + d, n + 1));
    (count > 0).then(|| total / count)
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(millis(*d))
}

fn serialize_opt_millis<S: serde::Serializer>(
    d: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&millis(*d)),
        None => s.serialize_none(),
    }
}
