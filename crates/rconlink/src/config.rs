//! Server selection: a `servers.json` file or single-server flags/env.

use std::path::Path;

use rconlink_frame::{ByteOrder, FrameConfig, FrameFormat};
use rconlink_session::{
    ConnectionDescriptor, CorrelationMode, Credentials, Executor, HttpFallback,
    HttpFallbackConfig, RconClient, ServerHandle, ServerRegistry, TokenPlacement,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::cmd::{parse_duration, CorrelationArg, TargetArgs};
use crate::exit::{io_error, CliError, CliResult};

pub const DEFAULT_PORT: u16 = 7779;

/// One entry of `servers.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub crcon_base: Option<String>,
    pub token: Option<String>,
    pub host: Option<String>,
    #[serde(deserialize_with = "port_from_any")]
    pub port: Option<u16>,
    pub rcon_password: Option<String>,
    pub rcon_username: Option<String>,
    pub tls: Option<bool>,
    pub token_in_body: Option<bool>,
}

/// Ports appear both as numbers and as digit strings.
fn port_from_any<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// A fully resolved server with the transports it can use.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub session: Option<ConnectionDescriptor>,
    pub http: Option<HttpFallbackConfig>,
}

impl Target {
    pub fn into_handle(self) -> CliResult<ServerHandle> {
        let mut handle = ServerHandle::new(self.id, self.name);
        if let Some(descriptor) = self.session {
            handle = handle.with_session(RconClient::new(descriptor));
        }
        if let Some(config) = self.http {
            let http = HttpFallback::new(config)
                .map_err(|err| CliError::new(crate::exit::INTERNAL, err.to_string()))?;
            handle = handle.with_http(Executor::from(http));
        }
        Ok(handle)
    }

    pub fn into_registry(self) -> CliResult<(String, ServerRegistry)> {
        let id = self.id.clone();
        let mut registry = ServerRegistry::new();
        registry.insert(self.into_handle()?);
        Ok((id, registry))
    }

    pub fn session_addr(&self) -> Option<String> {
        self.session
            .as_ref()
            .map(|descriptor| descriptor.endpoint.to_string())
    }
}

/// Read `servers.json`, skipping unusable entries with a warning.
pub fn load_servers(path: &Path) -> CliResult<Vec<ServerEntry>> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    parse_servers(&text)
        .map_err(|err| CliError::usage(format!("{} is not a valid server list: {err}", path.display())))
}

fn parse_servers(text: &str) -> serde_json::Result<Vec<ServerEntry>> {
    let entries: Vec<ServerEntry> = serde_json::from_str(text)?;
    Ok(entries
        .into_iter()
        .filter(|entry| {
            let usable = entry.id.is_some()
                && entry.name.is_some()
                && (has_session(entry) || has_http(entry));
            if !usable {
                warn!(id = ?entry.id, "skipping server entry without id, name or transport");
            }
            usable
        })
        .collect())
}

fn has_session(entry: &ServerEntry) -> bool {
    entry.host.is_some() && entry.rcon_password.is_some()
}

fn has_http(entry: &ServerEntry) -> bool {
    entry.crcon_base.is_some() && entry.token.is_some()
}

impl TargetArgs {
    /// Resolve the server to talk to.
    ///
    /// With `--servers`, pick `--server` (or the first entry); flags fill in
    /// what the entry leaves out. Otherwise build a single target from flags
    /// and environment.
    pub fn resolve(&self) -> CliResult<Target> {
        let entry = match &self.servers {
            Some(path) => {
                let entries = load_servers(path)?;
                let entry = match &self.server {
                    Some(id) => entries
                        .into_iter()
                        .find(|entry| entry.id.as_deref() == Some(id.as_str()))
                        .ok_or_else(|| CliError::usage(format!("no server '{id}' in {}", path.display())))?,
                    None => entries
                        .into_iter()
                        .next()
                        .ok_or_else(|| CliError::usage(format!("{} lists no usable servers", path.display())))?,
                };
                Some(entry)
            }
            None => None,
        };
        self.target_from(entry.unwrap_or_default())
    }

    fn target_from(&self, entry: ServerEntry) -> CliResult<Target> {
        let host = entry.host.clone().or_else(|| self.host.clone());
        let password = entry.rcon_password.clone().or_else(|| self.password.clone());
        let session = match (host, password) {
            (Some(host), Some(password)) => {
                let credentials = Credentials {
                    username: entry.rcon_username.clone().or_else(|| self.username.clone()),
                    password,
                };
                let port = entry.port.or(self.port).unwrap_or(DEFAULT_PORT);
                Some(self.descriptor(host, port, credentials, &entry)?)
            }
            _ => None,
        };

        let base = entry.crcon_base.or_else(|| self.crcon_url.clone());
        let token = entry.token.or_else(|| self.crcon_token.clone());
        let http = match (base, token) {
            (Some(base), Some(token)) => Some(HttpFallbackConfig::new(base, token)),
            _ => None,
        };

        if session.is_none() && http.is_none() {
            return Err(CliError::usage(
                "no server configured: pass --host and --password, --crcon-url and --crcon-token, or --servers",
            ));
        }

        let id = entry.id.unwrap_or_else(|| "default".to_string());
        let name = entry.name.unwrap_or_else(|| id.clone());
        Ok(Target {
            id,
            name,
            session,
            http,
        })
    }

    fn descriptor(
        &self,
        host: String,
        port: u16,
        credentials: Credentials,
        entry: &ServerEntry,
    ) -> CliResult<ConnectionDescriptor> {
        let format = FrameFormat::new(
            self.header_width,
            if self.little_endian {
                ByteOrder::Little
            } else {
                ByteOrder::Big
            },
        )
        .map_err(|err| CliError::usage(err.to_string()))?;
        let placement = if entry.token_in_body.unwrap_or(self.token_in_body) {
            TokenPlacement::body()
        } else {
            TokenPlacement::header()
        };
        let correlation = match self.correlation {
            CorrelationArg::Ordered => CorrelationMode::Ordered,
            CorrelationArg::Explicit => CorrelationMode::explicit(),
        };

        Ok(ConnectionDescriptor::new(host, port, credentials)
            .with_tls(entry.tls.unwrap_or(self.tls))
            .with_token_placement(placement)
            .with_correlation(correlation)
            .with_frame_config(FrameConfig {
                format,
                ..FrameConfig::default()
            })
            .with_login_timeout(parse_duration(&self.login_timeout)?))
    }
}
