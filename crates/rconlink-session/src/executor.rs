use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::client::{resolve_with, RconClient};
use crate::discovery::{Catalogue, CommandCheck};
use crate::envelope::CommandOutcome;
use crate::error::Result;
#[cfg(feature = "http")]
use crate::http::HttpFallback;

/// Which transport an [`Executor`] runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Session,
    Http,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Session => "session",
            ExecutorKind::Http => "http",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `execute` capability over either transport.
#[derive(Debug, Clone)]
pub enum Executor {
    Session(Arc<RconClient>),
    #[cfg(feature = "http")]
    Http(Arc<HttpFallback>),
}

impl Executor {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            Executor::Session(_) => ExecutorKind::Session,
            #[cfg(feature = "http")]
            Executor::Http(_) => ExecutorKind::Http,
        }
    }

    pub async fn execute(
        &self,
        command: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        match self {
            Executor::Session(client) => client.execute(command, body, timeout).await,
            #[cfg(feature = "http")]
            Executor::Http(http) => http.execute(command, body, timeout).await,
        }
    }

    pub async fn catalogue(&self, timeout: Duration) -> Option<Arc<Catalogue>> {
        match self {
            Executor::Session(client) => client.catalogue(timeout).await,
            #[cfg(feature = "http")]
            Executor::Http(http) => http.catalogue(timeout).await,
        }
    }

    pub async fn check_command(&self, command: &str, timeout: Duration) -> CommandCheck {
        match self.catalogue(timeout).await {
            Some(catalogue) => catalogue.check(command),
            None => CommandCheck::Unverified,
        }
    }

    /// See [`RconClient::resolve_command`].
    pub async fn resolve_command(&self, variants: &[&str], timeout: Duration) -> Option<String> {
        resolve_with(self.catalogue(timeout).await.as_deref(), variants)
    }

    /// Release the underlying session, if any.
    pub async fn close(&self) {
        match self {
            Executor::Session(client) => client.close().await,
            #[cfg(feature = "http")]
            Executor::Http(_) => {}
        }
    }
}

impl From<RconClient> for Executor {
    fn from(client: RconClient) -> Self {
        Executor::Session(Arc::new(client))
    }
}

#[cfg(feature = "http")]
impl From<HttpFallback> for Executor {
    fn from(http: HttpFallback) -> Self {
        Executor::Http(Arc::new(http))
    }
}
