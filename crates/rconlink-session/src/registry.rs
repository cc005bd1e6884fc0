//! Per-server executor routing.
//!
//! Callers address servers by id and never see sessions, tokens or
//! correlation ids. Writes go through the persistent session; reads prefer the
//! HTTP fallback so a stuck session cannot block status refresh.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::envelope::CommandOutcome;
use crate::error::{RconError, Result};
use crate::executor::Executor;

/// Whether a command changes server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Write,
    Read,
}

#[derive(Debug, Clone)]
pub struct ServerHandle {
    pub id: String,
    pub name: String,
    pub session: Option<Executor>,
    pub http: Option<Executor>,
}

impl ServerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            session: None,
            http: None,
        }
    }

    pub fn with_session(mut self, executor: impl Into<Executor>) -> Self {
        self.session = Some(executor.into());
        self
    }

    pub fn with_http(mut self, executor: impl Into<Executor>) -> Self {
        self.http = Some(executor.into());
        self
    }

    /// Pick the executor for an operation class.
    pub fn route(&self, class: OperationClass) -> Option<&Executor> {
        match class {
            OperationClass::Write => self.session.as_ref().or(self.http.as_ref()),
            OperationClass::Read => self.http.as_ref().or(self.session.as_ref()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: BTreeMap<String, ServerHandle>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server, replacing any previous entry with the same id.
    pub fn insert(&mut self, handle: ServerHandle) -> Option<ServerHandle> {
        self.servers.insert(handle.id.clone(), handle)
    }

    pub fn get(&self, id: &str) -> Option<&ServerHandle> {
        self.servers.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerHandle> {
        self.servers.values()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn route(&self, server_id: &str, class: OperationClass) -> Result<&Executor> {
        let server = self
            .get(server_id)
            .ok_or_else(|| RconError::UnknownServer(server_id.to_string()))?;
        server.route(class).ok_or_else(|| {
            RconError::InvalidRequest(format!("server '{server_id}' has no transport configured"))
        })
    }

    pub async fn execute(
        &self,
        server_id: &str,
        command: &str,
        body: Value,
        timeout: Duration,
        class: OperationClass,
    ) -> Result<CommandOutcome> {
        let executor = self.route(server_id, class)?;
        debug!(server = server_id, command, via = %executor.kind(), "routing command");
        executor.execute(command, body, timeout).await
    }

    /// Close every session client.
    pub async fn shutdown(&self) {
        for server in self.servers.values() {
            if let Some(session) = &server.session {
                session.close().await;
            }
        }
    }
}
