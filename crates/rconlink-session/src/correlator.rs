//! Request correlation.
//!
//! The correlator owns the pending-request table shared between the writer
//! side of a session and its reader task. In [`CorrelationMode::Ordered`] the
//! wire carries no identifier, so at most one live request may be outstanding
//! and responses are matched by arrival order. In
//! [`CorrelationMode::Explicit`] any number of requests may be in flight and
//! responses are matched by the identifier the server echoes back.
//!
//! Callers that stop waiting (timeout or cancellation) abandon their slot.
//! In ordered mode an abandoned slot that was already written stays in the
//! arrival queue so its late response is swallowed rather than handed to the
//! next caller.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::CorrelationMode;
use crate::envelope::Reply;
use crate::error::{RconError, Result, TimeoutPhase};

struct Slot {
    command: String,
    sent: bool,
    tx: oneshot::Sender<Result<Reply>>,
}

#[derive(Default)]
struct Table {
    waiting: HashMap<u64, Slot>,
    /// Written request ids in send order (ordered mode only).
    order: VecDeque<u64>,
    abandoned: HashSet<u64>,
    failed: Option<RconError>,
}

/// Pending-request table for one session.
pub struct Correlator {
    mode: CorrelationMode,
    table: Mutex<Table>,
}

impl Correlator {
    pub fn new(mode: CorrelationMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            table: Mutex::new(Table::default()),
        })
    }

    pub fn mode(&self) -> &CorrelationMode {
        &self.mode
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for request `id` before it is written.
    pub fn register(self: &Arc<Self>, id: u64, command: &str) -> Result<PendingRequest> {
        let mut table = self.table();
        if let Some(err) = &table.failed {
            return Err(err.clone());
        }
        if table.waiting.contains_key(&id) || table.abandoned.contains(&id) {
            return Err(RconError::protocol(
                format!("correlation id {id} is already pending"),
                None,
            ));
        }
        if self.mode == CorrelationMode::Ordered {
            if let Some(live) = table.waiting.values().next() {
                return Err(RconError::protocol(
                    format!(
                        "{command} issued while {} is still outstanding on an ordered link",
                        live.command
                    ),
                    None,
                ));
            }
        }

        let (tx, rx) = oneshot::channel();
        table.waiting.insert(
            id,
            Slot {
                command: command.to_string(),
                sent: false,
                tx,
            },
        );
        Ok(PendingRequest {
            id,
            correlator: Arc::clone(self),
            rx: Some(rx),
            settled: false,
        })
    }

    fn mark_sent(&self, id: u64) {
        let mut table = self.table();
        let Some(slot) = table.waiting.get_mut(&id) else {
            return;
        };
        slot.sent = true;
        if self.mode == CorrelationMode::Ordered {
            table.order.push_back(id);
        }
    }

    fn abandon(&self, id: u64) {
        let mut table = self.table();
        let Some(slot) = table.waiting.remove(&id) else {
            return;
        };
        if self.mode == CorrelationMode::Ordered && slot.sent {
            debug!(correlation_id = id, command = %slot.command, "abandoning in-flight request");
            table.abandoned.insert(id);
        }
    }

    /// Route one inbound result to its waiter.
    ///
    /// Returns an error for a response nobody asked for; the caller decides
    /// whether that is fatal.
    pub fn dispatch(&self, result: Result<Reply>) -> Result<()> {
        let mut table = self.table();
        match &self.mode {
            CorrelationMode::Ordered => {
                let Some(id) = table.order.pop_front() else {
                    return Err(unsolicited(result));
                };
                if table.abandoned.remove(&id) {
                    debug!(correlation_id = id, "discarding response for abandoned request");
                    return Ok(());
                }
                match table.waiting.remove(&id) {
                    Some(slot) => deliver(id, slot, result),
                    None => debug!(correlation_id = id, "response for settled request dropped"),
                }
                Ok(())
            }
            CorrelationMode::Explicit { field } => {
                let reply = result?;
                let Some(id) = reply.correlation_id else {
                    return Err(RconError::protocol(
                        format!("response without a {field} field"),
                        None,
                    ));
                };
                match table.waiting.remove(&id) {
                    Some(slot) => deliver(id, slot, Ok(reply)),
                    None => debug!(correlation_id = id, "discarding response with unknown id"),
                }
                Ok(())
            }
        }
    }

    /// Fail every request already written with `err`, leaving the table
    /// usable. Returns how many waiters were reached.
    pub fn fail_in_flight(&self, err: &RconError) -> usize {
        let mut table = self.table();
        let sent: Vec<u64> = table
            .waiting
            .iter()
            .filter(|(_, slot)| slot.sent)
            .map(|(id, _)| *id)
            .collect();
        for id in &sent {
            if let Some(slot) = table.waiting.remove(id) {
                deliver(*id, slot, Err(err.clone()));
            }
        }
        table.order.retain(|id| !sent.contains(id));
        sent.len()
    }

    /// Fail every waiter with `err` and refuse new registrations.
    pub fn fail_all(&self, err: RconError) {
        let mut table = self.table();
        let waiting = std::mem::take(&mut table.waiting);
        if !waiting.is_empty() {
            warn!(pending = waiting.len(), error = %err, "failing pending requests");
        }
        for (_, slot) in waiting {
            let _ = slot.tx.send(Err(err.clone()));
        }
        table.order.clear();
        table.abandoned.clear();
        table.failed.get_or_insert(err);
    }

    /// Live (not abandoned) requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.table().waiting.len()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("mode", &self.mode)
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn deliver(id: u64, slot: Slot, result: Result<Reply>) {
    if slot.tx.send(result).is_err() {
        debug!(correlation_id = id, command = %slot.command, "waiter gone before response");
    }
}

fn unsolicited(result: Result<Reply>) -> RconError {
    match result {
        Ok(reply) => RconError::protocol(
            format!(
                "response{} arrived with no pending request",
                reply
                    .name
                    .map(|name| format!(" for {name}"))
                    .unwrap_or_default()
            ),
            None,
        ),
        Err(err) => err,
    }
}

/// A registered request awaiting its response.
///
/// Dropping it before the response arrives abandons the slot.
#[derive(Debug)]
pub struct PendingRequest {
    id: u64,
    correlator: Arc<Correlator>,
    rx: Option<oneshot::Receiver<Result<Reply>>>,
    settled: bool,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record that the request has been written to the wire.
    pub fn mark_sent(&self) {
        self.correlator.mark_sent(self.id);
    }

    /// Wait for the correlated response until `deadline`.
    pub async fn await_response(mut self, deadline: Instant) -> Result<Reply> {
        let started = Instant::now();
        let Some(rx) = self.rx.take() else {
            return Err(RconError::Closed);
        };
        match timeout_at(deadline, rx).await {
            Ok(Ok(result)) => {
                self.settled = true;
                result
            }
            Ok(Err(_)) => {
                self.settled = true;
                Err(RconError::Closed)
            }
            Err(_) => Err(RconError::Timeout {
                phase: TimeoutPhase::Response,
                after: started.elapsed(),
            }),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.settled {
            self.correlator.abandon(self.id);
        }
    }
}
