//! The RCON client facade.
//!
//! One [`RconClient`] per remote server. Every command runs inside a single
//! critical section (a FIFO `tokio::sync::Mutex` around the current
//! [`Session`]), so callers are served in arrival order and reconnects never
//! run in parallel.
//!
//! Recovery budget per call: a transport failure (or a rejected token) tears
//! the session down, reconnects once, and retries once. A second such failure
//! becomes [`RconError::CommandFailed`]. Business failures are returned as
//! [`CommandOutcome::Rejected`] and never retried.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::ConnectionDescriptor;
use crate::discovery::{Catalogue, CommandCheck};
use crate::envelope::{body_map, CommandOutcome};
use crate::error::{RconError, Result, TimeoutPhase};
use crate::session::Session;
use crate::state::SessionState;

pub struct RconClient {
    descriptor: Arc<ConnectionDescriptor>,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
    catalogue: OnceCell<Option<Arc<Catalogue>>>,
    connect_attempts: AtomicU64,
}

impl RconClient {
    /// Create a client. No connection is opened until the first command or
    /// an explicit [`connect`](Self::connect).
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
            catalogue: OnceCell::new(),
            connect_attempts: AtomicU64::new(0),
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Run `command` with `body` (a JSON object or `null`).
    ///
    /// `timeout` bounds the whole call: waiting for the critical section,
    /// any (re)connect, and waiting for the response.
    pub async fn execute(
        &self,
        command: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        let body = body_map(body)?;
        let started = Instant::now();
        let deadline = started + timeout;

        let mut slot = self.acquire(started, deadline).await?;
        self.execute_locked(&mut slot, command, body, deadline).await
    }

    async fn acquire(
        &self,
        started: Instant,
        deadline: Instant,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<Session>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RconError::Closed);
        }
        let guard = timeout_at(deadline, self.session.lock())
            .await
            .map_err(|_| RconError::Timeout {
                phase: TimeoutPhase::Lock,
                after: started.elapsed(),
            })?;
        // close() may have run while we were queued.
        if self.closed.load(Ordering::Acquire) {
            return Err(RconError::Closed);
        }
        Ok(guard)
    }

    async fn execute_locked(
        &self,
        slot: &mut Option<Session>,
        command: &str,
        body: Map<String, Value>,
        deadline: Instant,
    ) -> Result<CommandOutcome> {
        // A session that died since the last call has already spent the
        // reconnect on this call's budget.
        let mut reconnected = false;
        let current = slot.as_ref().map(|session| (session.is_ready(), session.state()));
        match current {
            Some((true, _)) => {}
            Some((false, state)) => {
                warn!(%state, command, "session lost, reconnecting");
                self.teardown(slot).await;
                let session = self
                    .open(deadline)
                    .await
                    .map_err(|err| command_failed(command, 1, err))?;
                *slot = Some(session);
                reconnected = true;
            }
            None => {
                let session = self.open(deadline).await.map_err(connection_failed)?;
                *slot = Some(session);
            }
        }

        let err = match attempt(slot, command, body.clone(), deadline).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        if !err.is_retryable() {
            if err.poisons_session() {
                self.teardown(slot).await;
            }
            return Err(err);
        }

        self.teardown(slot).await;
        if reconnected {
            return Err(command_failed(command, 1, err));
        }

        warn!(command, error = %err, "command failed on a broken session, reconnecting once");
        let session = self
            .open(deadline)
            .await
            .map_err(|reconnect_err| command_failed(command, 1, reconnect_err))?;
        *slot = Some(session);

        match attempt(slot, command, body, deadline).await {
            Ok(outcome) => {
                info!(command, "command succeeded after reconnect");
                Ok(outcome)
            }
            Err(err) => {
                if err.poisons_session() {
                    self.teardown(slot).await;
                }
                if err.is_retryable() {
                    Err(command_failed(command, 2, err))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn open(&self, deadline: Instant) -> Result<Session> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(addr = %self.descriptor.endpoint, attempt, "opening session");
        Session::connect(Arc::clone(&self.descriptor), deadline).await
    }

    async fn teardown(&self, slot: &mut Option<Session>) {
        if let Some(mut session) = slot.take() {
            session.close().await;
        }
    }

    /// Connect and log in now instead of on the first command. No-op when a
    /// ready session already exists.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut slot = self.acquire(started, deadline).await?;
        if slot.as_ref().is_some_and(Session::is_ready) {
            return Ok(());
        }
        self.teardown(&mut slot).await;
        *slot = Some(self.open(deadline).await.map_err(connection_failed)?);
        Ok(())
    }

    /// Drain the current session and refuse further calls.
    ///
    /// Waits for the critical section, so it never overlaps a running command.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut slot = self.session.lock().await;
        self.teardown(&mut slot).await;
        debug!(addr = %self.descriptor.endpoint, "client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// State of the current session (waits for the critical section).
    pub async fn state(&self) -> SessionState {
        self.session
            .lock()
            .await
            .as_ref()
            .map(Session::state)
            .unwrap_or_default()
    }

    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(Session::is_ready)
    }

    /// Number of sessions opened (or attempted) over the client's lifetime.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Supported commands, fetched once with the introspection command.
    ///
    /// `None` when discovery failed; the failure is cached too.
    pub async fn catalogue(&self, timeout: Duration) -> Option<Arc<Catalogue>> {
        self.catalogue
            .get_or_init(|| async {
                let command = self.descriptor.introspection_command.as_str();
                match self.execute(command, Value::Null, timeout).await {
                    Ok(CommandOutcome::Completed(value)) => match Catalogue::from_value(&value) {
                        Some(catalogue) => {
                            info!(commands = catalogue.len(), "command catalogue loaded");
                            Some(Arc::new(catalogue))
                        }
                        None => {
                            warn!(raw = %value, "introspection output not recognised");
                            None
                        }
                    },
                    Ok(CommandOutcome::Rejected(failure)) => {
                        warn!(%failure, "introspection command rejected");
                        None
                    }
                    Err(err) => {
                        warn!(error = %err, "command discovery failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn check_command(&self, command: &str, timeout: Duration) -> CommandCheck {
        match self.catalogue(timeout).await {
            Some(catalogue) => catalogue.check(command),
            None => CommandCheck::Unverified,
        }
    }

    /// The first of `variants` the server supports, or the first variant when
    /// nothing is known about the server.
    pub async fn resolve_command(&self, variants: &[&str], timeout: Duration) -> Option<String> {
        resolve_with(self.catalogue(timeout).await.as_deref(), variants)
    }
}

impl std::fmt::Debug for RconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconClient")
            .field("descriptor", &self.descriptor)
            .field("closed", &self.is_closed())
            .field("connect_attempts", &self.connect_attempts())
            .finish()
    }
}

async fn attempt(
    slot: &mut Option<Session>,
    command: &str,
    body: Map<String, Value>,
    deadline: Instant,
) -> Result<CommandOutcome> {
    let session = slot
        .as_mut()
        .ok_or_else(|| RconError::link_closed("no session"))?;
    session.execute(command, body, deadline).await
}

pub(crate) fn resolve_with(catalogue: Option<&Catalogue>, variants: &[&str]) -> Option<String> {
    match catalogue {
        Some(catalogue) => catalogue.resolve(variants).map(str::to_string),
        None => variants.first().map(|name| name.to_string()),
    }
}

fn connection_failed(err: RconError) -> RconError {
    match err {
        RconError::Authentication { .. } | RconError::Timeout { .. } => err,
        other => RconError::Connection {
            source: Box::new(other),
        },
    }
}

fn command_failed(command: &str, attempts: u32, err: RconError) -> RconError {
    RconError::CommandFailed {
        command: command.to_string(),
        attempts,
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    #[test]
    fn initial_connect_failures_are_wrapped() {
        let err = connection_failed(RconError::link_closed("refused"));
        assert!(matches!(err, RconError::Connection { .. }));

        let err = connection_failed(RconError::Authentication {
            code: Some(401),
            message: "nope".to_string(),
        });
        assert!(matches!(err, RconError::Authentication { .. }));
    }

    #[test]
    fn resolve_falls_back_to_first_variant_without_catalogue() {
        assert_eq!(resolve_with(None, &["set_map", "map"]).as_deref(), Some("set_map"));
        let catalogue = Catalogue::from_names(["map"]);
        assert_eq!(
            resolve_with(Some(&catalogue), &["set_map", "map"]).as_deref(),
            Some("map")
        );
    }

    #[tokio::test]
    async fn closed_client_refuses_work() {
        let client = RconClient::new(ConnectionDescriptor::new(
            "127.0.0.1",
            1,
            Credentials::password("x"),
        ));
        client.close().await;
        let err = client
            .execute("Anything", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RconError::Closed));
        assert_eq!(client.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn non_object_body_is_rejected_before_connecting() {
        let client = RconClient::new(ConnectionDescriptor::new(
            "127.0.0.1",
            1,
            Credentials::password("x"),
        ));
        let err = client
            .execute("Anything", Value::from(3), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RconError::InvalidRequest(_)));
        assert_eq!(client.connect_attempts(), 0);
    }
}
