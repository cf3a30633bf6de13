//! Pending-request table (spec.md §3 Pending Request, §4.C Request/response,
//! §8 In-flight cap law).
//!
//! Generalizes the teacher's `ForwarderCommand::ConfigGet { reply:
//! oneshot::Sender<ForwarderProxyReply<T>> }` pattern (`state.rs`) into a
//! `requestId -> oneshot::Sender` table keyed by a caller-chosen in-flight
//! cap and a bounded wait queue.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Outcome delivered to a caller awaiting a response.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Ok(serde_json::Value),
    Error(String),
    Timeout,
    LinkLost,
    /// Queue cap exceeded at submit time (spec.md §7 Queue overflow):
    /// delivered synchronously through the same oneshot, rather than via
    /// a separate error return, so callers always just `.await` one future.
    QueueFull,
}

struct Pending {
    reply: oneshot::Sender<RequestOutcome>,
    deadline: Instant,
}

struct Queued {
    request_id: String,
    script: String,
    reply: oneshot::Sender<RequestOutcome>,
    timeout: Duration,
}

/// A request ready to be sent on the wire, popped from the queue as
/// in-flight slots free up.
pub struct ReadyRequest {
    pub request_id: String,
    pub script: String,
}

/// Tracks in-flight requests (capped) and a FIFO wait queue (also capped).
/// Single-writer: only the owning Homebase Link's actor task touches this.
pub struct PendingTable {
    in_flight: HashMap<String, Pending>,
    queue: VecDeque<Queued>,
    max_in_flight: usize,
    max_queue: usize,
}

impl PendingTable {
    pub fn new(max_in_flight: usize, max_queue: usize) -> Self {
        Self {
            in_flight: HashMap::new(),
            queue: VecDeque::new(),
            max_in_flight,
            max_queue,
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Submit a request. If an in-flight slot is free, returns it ready to
    /// send immediately. Otherwise it's queued, or — if the queue is also
    /// full — `reply` is resolved synchronously with `QueueFull` and
    /// `None` is returned.
    pub fn submit(
        &mut self,
        request_id: String,
        script: String,
        timeout: Duration,
        reply: oneshot::Sender<RequestOutcome>,
    ) -> Option<ReadyRequest> {
        if self.in_flight.len() < self.max_in_flight {
            self.in_flight.insert(
                request_id.clone(),
                Pending {
                    reply,
                    deadline: Instant::now() + timeout,
                },
            );
            return Some(ReadyRequest { request_id, script });
        }

        if self.queue.len() >= self.max_queue {
            let _ = reply.send(RequestOutcome::QueueFull);
            return None;
        }

        self.queue.push_back(Queued {
            request_id,
            script,
            reply,
            timeout,
        });
        None
    }

    /// Resolve a response by `requestId`. No-op (logged by the caller) if
    /// the id is unrecognized — spec.md §7 Protocol error.
    pub fn resolve(&mut self, request_id: &str, ok: bool, result: Option<serde_json::Value>, error: Option<String>) {
        if let Some(pending) = self.in_flight.remove(request_id) {
            let outcome = if ok {
                RequestOutcome::Ok(result.unwrap_or(serde_json::Value::Null))
            } else {
                RequestOutcome::Error(error.unwrap_or_else(|| "unknown error".to_owned()))
            };
            let _ = pending.reply.send(outcome);
        }
    }

    /// Drop any in-flight requests whose deadline has passed, returning how
    /// many were reaped. Frees their slots for the queue to drain into.
    pub fn reap_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(pending) = self.in_flight.remove(id) {
                let _ = pending.reply.send(RequestOutcome::Timeout);
            }
        }
        expired.len()
    }

    /// Pop the next queued request into an in-flight slot, if one is free.
    pub fn drain_one(&mut self) -> Option<ReadyRequest> {
        if self.in_flight.len() >= self.max_in_flight {
            return None;
        }
        let queued = self.queue.pop_front()?;
        self.in_flight.insert(
            queued.request_id.clone(),
            Pending {
                reply: queued.reply,
                deadline: Instant::now() + queued.timeout,
            },
        );
        Some(ReadyRequest {
            request_id: queued.request_id,
            script: queued.script,
        })
    }

    /// Reject everything in-flight and queued with `LinkLost` (spec.md
    /// Open Question 1: rejected immediately on teardown).
    pub fn reject_all(&mut self) {
        for (_, pending) in self.in_flight.drain() {
            let _ = pending.reply.send(RequestOutcome::LinkLost);
        }
        for queued in self.queue.drain(..) {
            let _ = queued.reply.send(RequestOutcome::LinkLost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_resolves_in_flight_immediately_when_slot_free() {
        let mut table = PendingTable::new(1, 1);
        let (tx, rx) = oneshot::channel();
        let ready = table.submit("R1".to_owned(), "script".to_owned(), Duration::from_secs(1), tx);
        assert!(ready.is_some());
        table.resolve("R1", true, Some(serde_json::json!("3.3")), None);
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Ok(v) if v == serde_json::json!("3.3")));
    }

    #[tokio::test]
    async fn queue_full_resolves_reply_with_queue_full() {
        let mut table = PendingTable::new(1, 1);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();
        table.submit("R1".to_owned(), "s".to_owned(), Duration::from_secs(1), tx1);
        table.submit("R2".to_owned(), "s".to_owned(), Duration::from_secs(1), tx2);
        let ready = table.submit("R3".to_owned(), "s".to_owned(), Duration::from_secs(1), tx3);
        assert!(ready.is_none());
        assert!(matches!(rx3.await.unwrap(), RequestOutcome::QueueFull));
    }

    #[tokio::test]
    async fn drain_fills_freed_slot_from_queue() {
        let mut table = PendingTable::new(1, 1);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        table.submit("R1".to_owned(), "s".to_owned(), Duration::from_secs(1), tx1);
        let queued = table.submit("R2".to_owned(), "s".to_owned(), Duration::from_secs(1), tx2);
        assert!(queued.is_none(), "second request should queue, not send");

        table.resolve("R1", true, None, None);
        let ready = table.drain_one();
        assert!(ready.is_some());
        assert_eq!(ready.unwrap().request_id, "R2");

        table.resolve("R2", true, Some(serde_json::json!(1)), None);
        assert!(matches!(rx2.await.unwrap(), RequestOutcome::Ok(_)));
    }

    #[tokio::test]
    async fn reject_all_resolves_everyone_with_link_lost() {
        let mut table = PendingTable::new(1, 1);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        table.submit("R1".to_owned(), "s".to_owned(), Duration::from_secs(1), tx1);
        table.submit("R2".to_owned(), "s".to_owned(), Duration::from_secs(1), tx2);
        table.reject_all();
        assert!(matches!(rx1.await.unwrap(), RequestOutcome::LinkLost));
        assert!(matches!(rx2.await.unwrap(), RequestOutcome::LinkLost));
    }
}
