use std::time::Duration;

use dashmap::DashMap;
use dhtnet_frame::MessageType;

/// Observational sink for message traffic. Implementations must not block.
pub trait MessageMetrics: Send + Sync + 'static {
    /// An outbound message of `size` bytes is about to be sent.
    fn message_sent(&self, msg_type: MessageType, size: usize);

    /// An inbound request of `size` bytes was read.
    fn message_received(&self, msg_type: MessageType, size: usize);

    /// Time from the start of an outbound call until its write begins.
    fn write_latency(&self, msg_type: MessageType, elapsed: Duration);

    /// Time from reading an inbound request until its response was flushed.
    fn inbound_handling_time(&self, msg_type: MessageType, elapsed: Duration);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MessageMetrics for NoopMetrics {
    fn message_sent(&self, _: MessageType, _: usize) {}
    fn message_received(&self, _: MessageType, _: usize) {}
    fn write_latency(&self, _: MessageType, _: Duration) {}
    fn inbound_handling_time(&self, _: MessageType, _: Duration) {}
}

/// Per message type totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeStats {
    pub sent: u64,
    pub sent_bytes: u64,
    pub received: u64,
    pub received_bytes: u64,
    pub writes: u64,
    pub total_write_latency: Duration,
    pub handled: u64,
    pub total_handling_time: Duration,
}

impl TypeStats {
    pub fn mean_write_latency(&self) -> Option<Duration> {
        mean(self.total_write_latency, self.writes)
    }

    pub fn mean_handling_time(&self) -> Option<Duration> {
        mean(self.total_handling_time, self.handled)
    }
}

fn mean(total: Duration, count: u64) -> Option<Duration> {
    let count = u32::try_from(count).ok().filter(|c| *c > 0)?;
    Some(total / count)
}

/// In-memory counters keyed by message type.
#[derive(Debug, Default)]
pub struct MessageStats {
    by_type: DashMap<MessageType, TypeStats>,
}

impl MessageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals for one message type; zeroes if it was never seen.
    pub fn snapshot(&self, msg_type: MessageType) -> TypeStats {
        self.by_type
            .get(&msg_type)
            .map(|stats| *stats)
            .unwrap_or_default()
    }

    /// Totals for every message type seen, ordered by type tag.
    pub fn snapshot_all(&self) -> Vec<(MessageType, TypeStats)> {
        let mut all: Vec<_> = self
            .by_type
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        all.sort_by_key(|(msg_type, _)| *msg_type);
        all
    }
}

impl MessageMetrics for MessageStats {
    fn message_sent(&self, msg_type: MessageType, size: usize) {
        let mut stats = self.by_type.entry(msg_type).or_default();
        stats.sent += 1;
        stats.sent_bytes += size as u64;
    }

    fn message_received(&self, msg_type: MessageType, size: usize) {
        let mut stats = self.by_type.entry(msg_type).or_default();
        stats.received += 1;
        stats.received_bytes += size as u64;
    }

    fn write_latency(&self, msg_type: MessageType, elapsed: Duration) {
        let mut stats = self.by_type.entry(msg_type).or_default();
        stats.writes += 1;
        stats.total_write_latency += elapsed;
    }

    fn inbound_handling_time(&self, msg_type: MessageType, elapsed: Duration) {
        let mut stats = self.by_type.entry(msg_type).or_default();
        stats.handled += 1;
        stats.total_handling_time += elapsed;
    }
}
