// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast Hub: fans out log lines, queue-state deltas, and per-request
//! traffic events to long-lived subscribers.
//!
//! A `tokio::sync::broadcast` channel per event kind, cheap to send from any
//! thread, no blocking on slow consumers. Spec §4.1 calls for three
//! *independent* channels rather than one aggregated feed, each capped at a
//! small subscriber count, rejected at accept time rather than silently
//! dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::admission::QueueSnapshot;
use crate::traffic::TrafficEvent;

/// Returned by `subscribe()` when a channel is already at its subscriber cap.
#[derive(Debug, Clone, Copy)]
pub struct TooManySubscribers;

/// One named broadcast channel with a hard cap on concurrent subscribers.
///
/// The cap is enforced by consulting `receiver_count()` before handing out a
/// new receiver; `tokio::sync::broadcast`'s own backpressure (lagged
/// receivers dropping messages) covers the "dead subscriber removed on next
/// send" contract without any extra bookkeeping here.
pub struct Channel<T> {
    tx: broadcast::Sender<T>,
    max_subscribers: usize,
}

impl<T: Clone + Send + 'static> Channel<T> {
    fn new(max_subscribers: usize) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx, max_subscribers }
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<T>, TooManySubscribers> {
        if self.tx.receiver_count() >= self.max_subscribers {
            return Err(TooManySubscribers);
        }
        Ok(self.tx.subscribe())
    }

    /// Push a value to all current subscribers. Never blocks: a send with no
    /// subscribers (or only lagging ones) is dropped silently, exactly as a
    /// producer running off the request loop requires.
    pub fn send(&self, value: T) {
        let _ = self.tx.send(value);
    }

    pub fn sender(&self) -> broadcast::Sender<T> {
        self.tx.clone()
    }
}

/// JSON envelope for a traffic observation pushed over the `traffic` channel.
pub type TrafficMessage = TrafficEvent;

/// The three independent broadcast channels named in spec §4.1.
pub struct BroadcastHub {
    pub logs: Channel<String>,
    pub queue: Channel<QueueSnapshot>,
    pub traffic: Channel<TrafficMessage>,
}

impl BroadcastHub {
    pub fn new(max_subscribers_per_channel: usize) -> Self {
        Self {
            logs: Channel::new(max_subscribers_per_channel),
            queue: Channel::new(max_subscribers_per_channel),
            traffic: Channel::new(max_subscribers_per_channel),
        }
    }
}

/// Serialize a broadcast payload to a JSON text frame, or `None` on (practically
/// impossible) serialization failure.
pub fn to_json_text<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_cap_rejects_at_accept_time() {
        let hub: Channel<String> = Channel::new(2);
        let _a = hub.subscribe().expect("first subscriber admitted");
        let _b = hub.subscribe().expect("second subscriber admitted");
        assert!(hub.subscribe().is_err(), "third subscriber should be rejected");
    }

    #[tokio::test]
    async fn dropping_a_subscriber_frees_a_slot() {
        let hub: Channel<String> = Channel::new(1);
        let first = hub.subscribe().expect("first subscriber admitted");
        assert!(hub.subscribe().is_err());
        drop(first);
        assert!(hub.subscribe().is_ok(), "slot should free once receiver drops");
    }

    #[tokio::test]
    async fn send_with_no_subscribers_does_not_panic() {
        let hub: Channel<String> = Channel::new(10);
        hub.send("line".to_owned());
    }

    #[tokio::test]
    async fn subscriber_receives_sent_value() {
        let hub: Channel<String> = Channel::new(10);
        let mut rx = hub.subscribe().expect("subscribe");
        hub.send("hello".to_owned());
        let got = rx.recv().await.expect("recv");
        assert_eq!(got, "hello");
    }
}
