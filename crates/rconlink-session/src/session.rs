//! One physical, authenticated RCON connection.
//!
//! A [`Session`] owns the write half of the stream and spawns a reader task
//! that decodes inbound frames and hands them to the session's
//! [`Correlator`]. The session itself performs no locking: callers must hold
//! it exclusively (the [`RconClient`](crate::RconClient) keeps it behind a
//! FIFO mutex).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rconlink_frame::RconCodec;
use rconlink_transport::RconStream;
use serde_json::{Map, Value};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::config::ConnectionDescriptor;
use crate::correlator::Correlator;
use crate::envelope::{self, CommandOutcome, Envelope, Reply, ReplyStatus};
use crate::error::{RconError, Result, TimeoutPhase};
use crate::state::SessionState;

/// How long `close` waits for the write half to flush and shut down.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Frames the correlator did not claim, kept for [`Session::receive`].
const UNMATCHED_BUFFER: usize = 64;

/// Status code servers use for an expired or unknown token.
const STATUS_UNAUTHORIZED: i64 = 401;

/// Session token handed out by the login handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<redacted:{} bytes>)", self.0.len())
    }
}

type FrameWriter = FramedWrite<WriteHalf<RconStream>, RconCodec>;
type FrameReader = FramedRead<ReadHalf<RconStream>, RconCodec>;

pub struct Session {
    descriptor: Arc<ConnectionDescriptor>,
    state: SessionState,
    writer: Option<FrameWriter>,
    reader: Option<JoinHandle<()>>,
    unmatched: Option<mpsc::Receiver<Bytes>>,
    correlator: Arc<Correlator>,
    link_alive: Arc<AtomicBool>,
    token: Option<AccessToken>,
    seq: u64,
    write_in_progress: bool,
}

impl Session {
    /// Open the transport, log in, and return a ready session.
    ///
    /// Socket open plus login is bounded by the earlier of `deadline` and the
    /// descriptor's login timeout. On any failure the partially opened
    /// connection is released before the error is returned.
    pub async fn connect(descriptor: Arc<ConnectionDescriptor>, deadline: Instant) -> Result<Self> {
        let started = Instant::now();
        let deadline = deadline.min(started + descriptor.login_timeout);
        let mut session = Self {
            correlator: Correlator::new(descriptor.correlation.clone()),
            descriptor,
            state: SessionState::Disconnected,
            writer: None,
            reader: None,
            unmatched: None,
            link_alive: Arc::new(AtomicBool::new(false)),
            token: None,
            seq: 0,
            write_in_progress: false,
        };

        match session.establish(started, deadline).await {
            Ok(()) => Ok(session),
            Err(err) => {
                session.close().await;
                Err(err)
            }
        }
    }

    async fn establish(&mut self, started: Instant, deadline: Instant) -> Result<()> {
        let endpoint = &self.descriptor.endpoint;
        self.state.transition_to(SessionState::Connecting)?;
        debug!(addr = %endpoint, tls = self.descriptor.tls, "connecting");

        let stream = timeout_at(deadline, rconlink_transport::connect(endpoint, self.descriptor.tls))
            .await
            .map_err(|_| RconError::Timeout {
                phase: TimeoutPhase::Connect,
                after: started.elapsed(),
            })??;

        let (read_half, write_half) = tokio::io::split(stream);
        let codec = RconCodec::new(self.descriptor.frame);
        let (unmatched_tx, unmatched_rx) = mpsc::channel(UNMATCHED_BUFFER);
        self.link_alive.store(true, Ordering::Release);
        self.writer = Some(FramedWrite::new(write_half, codec));
        self.unmatched = Some(unmatched_rx);
        self.reader = Some(tokio::spawn(read_loop(
            FramedRead::new(read_half, codec),
            Arc::clone(&self.correlator),
            Arc::clone(&self.link_alive),
            self.descriptor.correlation.field().map(str::to_string),
            unmatched_tx,
        )));

        self.state.transition_to(SessionState::Authenticating)?;
        let token = self.login(started, deadline).await?;
        self.token = Some(token);
        self.state.transition_to(SessionState::Ready)?;
        info!(addr = %self.descriptor.endpoint, elapsed_ms = started.elapsed().as_millis() as u64, "session ready");
        Ok(())
    }

    async fn login(&mut self, started: Instant, deadline: Instant) -> Result<AccessToken> {
        let credentials = &self.descriptor.credentials;
        let mut body = Map::new();
        if let Some(username) = &credentials.username {
            body.insert("Username".to_string(), Value::String(username.clone()));
        }
        body.insert(
            "Password".to_string(),
            Value::String(credentials.password.clone()),
        );

        let command = self.descriptor.login_command.clone();
        let reply = self
            .round_trip(&command, body, deadline)
            .await
            .map_err(|err| match err {
                RconError::Timeout { .. } => RconError::Timeout {
                    phase: TimeoutPhase::Connect,
                    after: started.elapsed(),
                },
                other => other,
            })?;

        match reply.status {
            ReplyStatus::Success(result) => envelope::extract_token(&result)
                .map(AccessToken)
                .ok_or_else(|| {
                    RconError::protocol(
                        "login succeeded but carried no access token",
                        Some(result.to_string().as_bytes()),
                    )
                }),
            ReplyStatus::Failure(failure) => {
                warn!(code = ?failure.code, "login rejected");
                Err(RconError::Authentication {
                    code: failure.code,
                    message: failure.message,
                })
            }
        }
    }

    /// Send one envelope and wait for its correlated reply.
    async fn round_trip(
        &mut self,
        command: &str,
        body: Map<String, Value>,
        deadline: Instant,
    ) -> Result<Reply> {
        if !self.state.can_write() || !self.link_alive.load(Ordering::Acquire) {
            return Err(RconError::link_closed("session is not connected"));
        }

        self.seq += 1;
        let id = self.seq;
        let mut envelope = Envelope::build(
            command,
            self.descriptor.protocol_version,
            body,
            self.token.as_ref().map(AccessToken::as_str),
            &self.descriptor.token_placement,
        );
        if let Some(field) = self.descriptor.correlation.field() {
            envelope.set_correlation(field, id);
        }
        let payload = envelope.to_bytes()?;

        let pending = self.correlator.register(id, command)?;
        // Marked before the write so a fast reply cannot overtake it.
        pending.mark_sent();
        self.write_frame(payload, deadline).await?;
        debug!(command, correlation_id = id, "request sent");

        pending.await_response(deadline).await
    }

    async fn write_frame(&mut self, frame: Bytes, deadline: Instant) -> Result<()> {
        let started = Instant::now();
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RconError::link_closed("session has no writer"))?;

        self.write_in_progress = true;
        let written = timeout_at(deadline, writer.send(frame)).await;
        self.write_in_progress = false;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.link_alive.store(false, Ordering::Release);
                Err(err.into())
            }
            Err(_) => {
                // A partial frame may be on the wire.
                self.link_alive.store(false, Ordering::Release);
                Err(RconError::Timeout {
                    phase: TimeoutPhase::Send,
                    after: started.elapsed(),
                })
            }
        }
    }

    /// Run `command` and return the server's answer.
    ///
    /// A 401 failure reply means the server no longer honours our token and is
    /// reported as [`RconError::TokenRejected`] rather than a business failure.
    pub async fn execute(
        &mut self,
        command: &str,
        body: Map<String, Value>,
        deadline: Instant,
    ) -> Result<CommandOutcome> {
        if !self.state.is_ready() {
            return Err(RconError::link_closed(format!(
                "session is {}, not ready",
                self.state
            )));
        }
        let reply = self.round_trip(command, body, deadline).await?;
        match reply.status {
            ReplyStatus::Failure(failure)
                if failure.code == Some(STATUS_UNAUTHORIZED)
                    && command != self.descriptor.login_command =>
            {
                Err(RconError::TokenRejected {
                    command: command.to_string(),
                    message: failure.message,
                })
            }
            status => Ok(status.into()),
        }
    }

    /// Write one raw frame. Only allowed once the session is ready.
    pub async fn send(&mut self, frame: Bytes, deadline: Instant) -> Result<()> {
        if !self.state.is_ready() || !self.link_alive.load(Ordering::Acquire) {
            return Err(RconError::link_closed("session is not ready"));
        }
        self.write_frame(frame, deadline).await
    }

    /// Next inbound frame the correlator could not match to a request, such
    /// as an out-of-band server push.
    pub async fn receive(&mut self, deadline: Instant) -> Result<Bytes> {
        let started = Instant::now();
        let unmatched = self
            .unmatched
            .as_mut()
            .ok_or_else(|| RconError::link_closed("session is not connected"))?;
        match timeout_at(deadline, unmatched.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(RconError::link_closed("reader stopped")),
            Err(_) => Err(RconError::Timeout {
                phase: TimeoutPhase::Response,
                after: started.elapsed(),
            }),
        }
    }

    /// Ready, link up, and no half-written frame.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready() && self.link_alive.load(Ordering::Acquire) && !self.write_in_progress
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Fail outstanding requests and release the socket. Safe to call twice.
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected && self.writer.is_none() && self.reader.is_none() {
            return;
        }
        if self.state.is_ready() {
            let _ = self.state.transition_to(SessionState::Draining);
        }
        self.correlator.fail_all(RconError::Closed);

        if let Some(mut writer) = self.writer.take() {
            if timeout(CLOSE_GRACE, writer.close()).await.is_err() {
                debug!("write half did not shut down in time");
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.unmatched = None;
        self.link_alive.store(false, Ordering::Release);
        self.token = None;
        let _ = self.state.transition_to(SessionState::Disconnected);
        debug!(addr = %self.descriptor.endpoint, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.descriptor.endpoint)
            .field("state", &self.state)
            .field("token", &self.token)
            .field("seq", &self.seq)
            .field("link_alive", &self.link_alive.load(Ordering::Relaxed))
            .finish()
    }
}

async fn read_loop(
    mut frames: FrameReader,
    correlator: Arc<Correlator>,
    link_alive: Arc<AtomicBool>,
    correlation_field: Option<String>,
    unmatched: mpsc::Sender<Bytes>,
) {
    let failure = loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                let parsed = envelope::parse(&frame, correlation_field.as_deref());
                if let Err(err) = &parsed {
                    warn!(error = %err, raw = err.raw_payload().unwrap_or_default(), "undecodable response");
                }
                if let Err(err) = correlator.dispatch(parsed) {
                    warn!(
                        error = %err,
                        raw = %String::from_utf8_lossy(&frame),
                        "response did not match a pending request"
                    );
                    match correlation_field.as_deref() {
                        // Requests in flight cannot tell whether this was
                        // theirs, so they all get the protocol error.
                        Some(_) => {
                            let err = with_raw(err, &frame);
                            correlator.fail_in_flight(&err);
                        }
                        // Arrival order is the only correlation; the stream
                        // can no longer be trusted.
                        None => link_alive.store(false, Ordering::Release),
                    }
                    if unmatched.try_send(frame).is_err() {
                        debug!("unmatched frame buffer full, dropping frame");
                    }
                }
            }
            Some(Err(err)) => break RconError::from(err),
            None => break RconError::link_closed("server closed the connection"),
        }
    };

    link_alive.store(false, Ordering::Release);
    debug!(error = %failure, "reader stopped");
    correlator.fail_all(failure);
}

fn with_raw(err: RconError, frame: &[u8]) -> RconError {
    match err {
        RconError::Protocol { message, raw: None } => RconError::protocol(message, Some(frame)),
        other => other,
    }
}
