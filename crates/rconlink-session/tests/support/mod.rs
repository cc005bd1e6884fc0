//! Scripted in-process RCON server for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rconlink_frame::RconCodec;
use rconlink_session::{ConnectionDescriptor, Credentials};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::codec::Framed;

pub const PASSWORD: &str = "hunter2";

/// A decoded request as the server saw it.
#[derive(Debug, Clone)]
pub struct Request {
    pub connection: usize,
    pub command: String,
    pub body: Value,
    pub envelope: Value,
}

impl Request {
    /// Token from the body (`Token`) or the top-level `authToken` field.
    pub fn token(&self) -> Option<&str> {
        self.body
            .get("Token")
            .or_else(|| self.envelope.get("authToken"))
            .and_then(Value::as_str)
    }
}

pub enum Action {
    Reply(Value),
    /// Sleep, then reply, blocking the connection meanwhile.
    Delay(Duration, Value),
    /// Write these bytes verbatim as one frame payload.
    Raw(Bytes),
    /// Write these bytes to the socket with no framing.
    Wire(Vec<u8>),
    /// Close the connection without answering.
    Drop,
    /// Never answer.
    Ignore,
}

pub fn ok(content: Value) -> Action {
    Action::Reply(ok_body(content))
}

/// Success reply body, for use with [`Action::Delay`].
pub fn ok_body(content: Value) -> Value {
    json!({
        "statusCode": 200,
        "statusMessage": "OK",
        "contentBody": content,
    })
}

pub fn fail(code: i64, message: &str, content: Value) -> Action {
    Action::Reply(json!({
        "statusCode": code,
        "statusMessage": message,
        "contentBody": content,
    }))
}

type Handler = dyn Fn(&Request) -> Action + Send + Sync;

struct Shared {
    handler: Box<Handler>,
    accept_login: AtomicBool,
    reject_token_once: AtomicBool,
    connections: AtomicUsize,
    logins: AtomicUsize,
    requests: Mutex<Vec<Request>>,
    live: Mutex<Vec<AbortHandle>>,
}

pub struct FakeServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Action + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            handler: Box::new(handler),
            accept_login: AtomicBool::new(true),
            reject_token_once: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            live: Mutex::new(Vec::new()),
        });

        let acceptor = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let connection = shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
                    let task = tokio::spawn(serve(socket, connection, Arc::clone(&shared)));
                    shared.live.lock().unwrap().push(task.abort_handle());
                }
            }
        });

        Self {
            addr,
            shared,
            acceptor,
        }
    }

    /// Server that answers every command with its own body.
    pub async fn echo() -> Self {
        Self::start(|request| ok(request.body.clone())).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(
            self.addr.ip().to_string(),
            self.addr.port(),
            Credentials::password(PASSWORD),
        )
        .with_login_timeout(Duration::from_secs(2))
    }

    /// Drop every open connection.
    pub fn kill_connections(&self) {
        for handle in self.shared.live.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    pub fn set_accept_login(&self, accept: bool) {
        self.shared.accept_login.store(accept, Ordering::SeqCst);
    }

    /// Answer the next non-login command with 401.
    pub fn reject_token_once(&self) {
        self.shared.reject_token_once.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.shared.logins.load(Ordering::SeqCst)
    }

    /// Non-login requests received, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.requests().iter().filter(|r| r.command == command).count()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.acceptor.abort();
        self.kill_connections();
    }
}

async fn serve(socket: TcpStream, connection: usize, shared: Arc<Shared>) {
    let mut framed = Framed::new(socket, RconCodec::default());
    while let Some(Ok(frame)) = framed.next().await {
        let Ok(envelope) = serde_json::from_slice::<Value>(&frame) else {
            return;
        };
        let request = Request {
            connection,
            command: envelope["command"].as_str().unwrap_or_default().to_string(),
            body: envelope["body"].clone(),
            envelope: envelope.clone(),
        };

        let action = if request.command == "Login" {
            shared.logins.fetch_add(1, Ordering::SeqCst);
            let password_ok = request.body["Password"] == PASSWORD;
            if shared.accept_login.load(Ordering::SeqCst) && password_ok {
                ok(json!({"token": format!("tok-{connection}")}))
            } else {
                fail(401, "invalid credentials", Value::Null)
            }
        } else {
            shared.requests.lock().unwrap().push(request.clone());
            if shared.reject_token_once.swap(false, Ordering::SeqCst) {
                fail(401, "token expired", Value::Null)
            } else if request.token() != Some(format!("tok-{connection}").as_str()) {
                fail(401, "bad token", Value::Null)
            } else {
                (shared.handler)(&request)
            }
        };

        let reply = match action {
            Action::Reply(reply) => reply,
            Action::Delay(delay, reply) => {
                tokio::time::sleep(delay).await;
                reply
            }
            Action::Raw(bytes) => {
                if framed.send(bytes).await.is_err() {
                    return;
                }
                continue;
            }
            Action::Wire(bytes) => {
                let _ = framed.get_mut().write_all(&bytes).await;
                continue;
            }
            Action::Drop => return,
            Action::Ignore => continue,
        };

        let reply = decorate(reply, &request);
        let payload = Bytes::from(serde_json::to_vec(&reply).unwrap());
        if framed.send(payload).await.is_err() {
            return;
        }
    }
}

/// Add `name`/`version` and echo `requestId` unless the script set one.
fn decorate(mut reply: Value, request: &Request) -> Value {
    let object = reply.as_object_mut().unwrap();
    object
        .entry("name")
        .or_insert_with(|| Value::String(request.command.clone()));
    object.entry("version").or_insert(json!(2));
    if let Some(id) = request.envelope.get("requestId") {
        object.entry("requestId").or_insert_with(|| id.clone());
    }
    reply
}
