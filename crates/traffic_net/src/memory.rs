//! In-process transport.
//!
//! Queues live in memory and are shared by every clone of a
//! [`MemoryTransport`], so several zones and the coordinator can run in one
//! process. Naked deliveries go back on their queue. Publishes can be made to
//! fail on demand with [`MemoryTransport::fail_next`], and inboxes with
//! [`MemoryTransport::inject_inbox_fault`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::bus::{Acknowledge, Delivery, Inbox, Transport};
use crate::error::NetError;

struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    seen: HashSet<String>,
    faults: VecDeque<InboxFault>,
    backlog: usize,
    acks: usize,
    naks: usize,
    opens: usize,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            seen: HashSet::new(),
            faults: VecDeque::new(),
            backlog: 0,
            acks: 0,
            naks: 0,
            opens: 0,
        }
    }
}

/// A failure an inbox reports instead of its next delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxFault {
    /// `next` yields an error.
    Error,
    /// `next` reports the inbox as closed.
    Closed,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    fail_next: u32,
}

/// Shared, cloneable in-memory queues.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` publish attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Make an inbox of `queue` report `fault` on a coming `next` call.
    /// Faults are reported in injection order.
    pub fn inject_inbox_fault(&self, queue: &str, fault: InboxFault) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_insert_with(Queue::new)
            .faults
            .push_back(fault);
    }

    /// Times `queue` has been opened.
    #[must_use]
    pub fn opens(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.opens)
    }

    /// Messages on `queue` that have not been acked yet.
    #[must_use]
    pub fn backlog(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.backlog)
    }

    /// Deliveries on `queue` acked so far.
    #[must_use]
    pub fn acks(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.acks)
    }

    /// Deliveries on `queue` naked so far.
    #[must_use]
    pub fn naks(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.naks)
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let mut queues: Vec<&String> = state.queues.keys().collect();
        queues.sort();
        f.debug_struct("MemoryTransport").field("queues", &queues).finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, queue: &str, message_id: &str, payload: Vec<u8>) -> Result<(), NetError> {
        let mut state = self.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(NetError::Nats(format!("injected publish failure on {queue}")));
        }
        let q = state
            .queues
            .entry(queue.to_string())
            .or_insert_with(Queue::new);
        if !q.seen.insert(message_id.to_string()) {
            trace!(queue, message_id, "dropping duplicate publish");
            return Ok(());
        }
        q.tx
            .send(payload)
            .map_err(|_| NetError::Closed(queue.to_string()))?;
        q.backlog += 1;
        Ok(())
    }

    async fn open(&self, queue: &str) -> Result<Box<dyn Inbox>, NetError> {
        let rx = {
            let mut state = self.lock();
            let q = state
                .queues
                .entry(queue.to_string())
                .or_insert_with(Queue::new);
            q.opens += 1;
            Arc::clone(&q.rx)
        };
        Ok(Box::new(MemoryInbox {
            queue: queue.to_string(),
            rx,
            transport: self.clone(),
        }))
    }
}

struct MemoryInbox {
    queue: String,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    transport: MemoryTransport,
}

#[async_trait]
impl Inbox for MemoryInbox {
    async fn next(&mut self) -> Option<Result<Delivery, NetError>> {
        let fault = self
            .transport
            .lock()
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.faults.pop_front());
        match fault {
            Some(InboxFault::Error) => {
                return Some(Err(NetError::Nats(format!("injected inbox failure on {}", self.queue))));
            }
            Some(InboxFault::Closed) => return None,
            None => {}
        }
        let payload = self.rx.lock().await.recv().await?;
        let settle = MemorySettle {
            queue: self.queue.clone(),
            payload: payload.clone(),
            transport: self.transport.clone(),
        };
        Some(Ok(Delivery::new(payload, Box::new(settle))))
    }
}

struct MemorySettle {
    queue: String,
    payload: Vec<u8>,
    transport: MemoryTransport,
}

#[async_trait]
impl Acknowledge for MemorySettle {
    async fn ack(self: Box<Self>) -> Result<(), NetError> {
        let mut state = self.transport.lock();
        if let Some(q) = state.queues.get_mut(&self.queue) {
            q.acks += 1;
            q.backlog = q.backlog.saturating_sub(1);
        }
        Ok(())
    }

    async fn nak(self: Box<Self>) -> Result<(), NetError> {
        let mut state = self.transport.lock();
        let q = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| NetError::Closed(self.queue.clone()))?;
        q.naks += 1;
        q.tx
            .send(self.payload)
            .map_err(|_| NetError::Closed(self.queue.clone()))
    }
}
