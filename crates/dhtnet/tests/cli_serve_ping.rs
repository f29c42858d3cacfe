#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Output, Stdio};

struct Server {
    child: Child,
    addr: String,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start `dhtnet serve` on an ephemeral port and wait for its listening line.
fn start_server(peer_id: &str) -> Server {
    let mut child = Command::new(env!("CARGO_BIN_EXE_dhtnet"))
        .args(["--log-level", "error", "--format", "json", "serve"])
        .args(["--listen", "127.0.0.1:0", "--peer-id", peer_id])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("serve should print a listening line");
    let event: serde_json::Value =
        serde_json::from_str(&line).expect("listening line should be JSON");
    assert_eq!(event["event"], "listening");
    assert_eq!(event["peer_id"], peer_id);
    assert_eq!(event["protocols"][0], "/ipfs/kad/1.0.0");

    let addr = event["addr"]
        .as_str()
        .expect("listening line should carry the address")
        .to_string();
    Server { child, addr }
}

fn dhtnet(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dhtnet"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("dhtnet should run")
}

#[test]
fn ping_reuses_one_stream() {
    let server = start_server("srv");

    let output = dhtnet(&["ping", "--peer", "srv", "--addr", server.addr.as_str(), "-n", "3"]);
    assert!(
        output.status.success(),
        "ping failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("ping report should be JSON");
    assert_eq!(report["peer_id"], "srv");
    assert_eq!(report["count"], 3);
    assert_eq!(report["dials"], 1);
    assert_eq!(report["samples"][2]["seq"], 3);
}

#[test]
fn ping_wrong_peer_id_is_transport_error() {
    let server = start_server("srv");

    let output = dhtnet(&["ping", "--peer", "someone-else", "--addr", server.addr.as_str()]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("remote identified as srv"), "stderr: {stderr}");
}

#[test]
fn ping_refused_connection_fails() {
    let output = dhtnet(&["ping", "--peer", "srv", "--addr", "127.0.0.1:1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ping failed"));
}

#[test]
fn send_put_value_without_reply() {
    let server = start_server("srv");

    let output = dhtnet(&[
        "send", "--peer", "srv", "--addr", server.addr.as_str(), "--type", "put-value", "--data", "v1",
    ]);
    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let sent: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send output should be JSON");
    assert_eq!(sent["event"], "sent");
    assert_eq!(sent["msg_type"], "put-value");
    assert_eq!(sent["payload"], "v1");
}

#[test]
fn request_without_handler_fails() {
    let server = start_server("srv");

    let output = dhtnet(&[
        "send",
        "--peer",
        "srv",
        "--addr",
        server.addr.as_str(),
        "--type",
        "find-node",
        "--expect-reply",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("request failed"));
}

#[test]
fn version_prints_name() {
    let output = dhtnet(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("dhtnet "));
}
