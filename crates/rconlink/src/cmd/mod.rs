use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use rconlink_session::{Executor, OperationClass, ServerRegistry};

use crate::exit::{rcon_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod discover;
pub mod exec;
pub mod probe;
pub mod servers;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one command and print the server's answer.
    Exec(ExecArgs),
    /// List the commands the server supports.
    Discover(DiscoverArgs),
    /// Connect, log in, and report session state and latency.
    Probe(ProbeArgs),
    /// Poll a read command until interrupted.
    Watch(WatchArgs),
    /// List servers from a servers file.
    Servers(ServersArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Exec(args) => exec::run(args, format).await,
        Command::Discover(args) => discover::run(args, format).await,
        Command::Probe(args) => probe::run(args, format).await,
        Command::Watch(args) => watch::run(args, format).await,
        Command::Servers(args) => servers::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum CorrelationArg {
    /// Match responses by arrival order.
    #[default]
    Ordered,
    /// Match responses by an echoed `requestId` field.
    Explicit,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Via {
    /// Writes over the session, reads over HTTP when configured.
    #[default]
    Auto,
    Session,
    Http,
}

/// Where and how to connect.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Servers file (JSON array in the `servers.json` layout).
    #[arg(long, value_name = "FILE")]
    pub servers: Option<PathBuf>,
    /// Server id to select from the servers file.
    #[arg(long, short = 's', requires = "servers")]
    pub server: Option<String>,
    /// RCON host.
    #[arg(long, env = "RCON_HOST")]
    pub host: Option<String>,
    /// RCON port.
    #[arg(long, env = "RCON_PORT")]
    pub port: Option<u16>,
    /// RCON username, for servers that expect one.
    #[arg(long, env = "RCON_USERNAME")]
    pub username: Option<String>,
    /// RCON password.
    #[arg(long, env = "RCON_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Wrap the connection in TLS.
    #[arg(long, env = "RCON_TLS")]
    pub tls: bool,
    /// Send the session token inside the command body (otherwise as a
    /// top-level envelope field).
    #[arg(long, env = "RCON_TOKEN_IN_BODY", default_value_t = true, action = clap::ArgAction::Set)]
    pub token_in_body: bool,
    /// Response correlation strategy.
    #[arg(long, value_enum, default_value_t = CorrelationArg::Ordered)]
    pub correlation: CorrelationArg,
    /// Frame length header width in bytes (1-8).
    #[arg(long, default_value_t = 4)]
    pub header_width: usize,
    /// Frame length header is little-endian.
    #[arg(long)]
    pub little_endian: bool,
    /// Login deadline (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub login_timeout: String,
    /// CRCON base URL for the HTTP fallback.
    #[arg(long, env = "CRCON_BASE_URL")]
    pub crcon_url: Option<String>,
    /// CRCON API token for the HTTP fallback.
    #[arg(long, env = "CRCON_API_TOKEN", hide_env_values = true)]
    pub crcon_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command name (e.g. ChangeMap).
    pub command: String,
    /// JSON object body.
    #[arg(long, short = 'b', default_value = "{}")]
    pub body: String,
    /// Transport to use.
    #[arg(long, value_enum, default_value_t = Via::Auto)]
    pub via: Via,
    /// Treat the command as read-only (routes to HTTP under --via auto).
    #[arg(long)]
    pub read: bool,
    /// Validate the command name against discovery first.
    #[arg(long)]
    pub check: bool,
    /// Overall deadline (e.g. 5s, 500ms, 1m).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Transport to query.
    #[arg(long, value_enum, default_value_t = Via::Auto)]
    pub via: Via,
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Connect and login deadline (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Read command to poll.
    pub command: String,
    /// JSON object body.
    #[arg(long, short = 'b', default_value = "{}")]
    pub body: String,
    /// Time between polls.
    #[arg(long, default_value = "5s")]
    pub interval: String,
    /// Per-poll deadline.
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Stop after N polls.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Servers file to list.
    #[arg(long, value_name = "FILE")]
    pub servers: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Pick the executor for `via`, routing by operation class under `auto`.
pub fn select_executor<'a>(
    registry: &'a ServerRegistry,
    server_id: &str,
    via: Via,
    class: OperationClass,
) -> CliResult<&'a Executor> {
    let handle = registry
        .get(server_id)
        .ok_or_else(|| CliError::usage(format!("unknown server '{server_id}'")))?;
    match via {
        Via::Auto => registry
            .route(server_id, class)
            .map_err(|err| rcon_error("routing failed", err)),
        Via::Session => handle
            .session
            .as_ref()
            .ok_or_else(|| CliError::usage("no RCON session configured (--host/--password)")),
        Via::Http => handle
            .http
            .as_ref()
            .ok_or_else(|| CliError::usage("no HTTP fallback configured (--crcon-url/--crcon-token)")),
    }
}

pub fn millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 10.0).round() / 10.0
}

/// Parse `500ms`, `5s`, `2m`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Parse a `--body` argument as a JSON object.
pub fn parse_body(input: &str) -> CliResult<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(input)
        .map_err(|err| CliError::usage(format!("--body is not valid JSON: {err}")))?;
    if !value.is_object() {
        return Err(CliError::usage("--body must be a JSON object"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn body_must_be_an_object() {
        assert!(parse_body(r#"{"MapId":"foy_warfare"}"#).is_ok());
        assert_eq!(parse_body("[1]").unwrap_err().code, crate::exit::USAGE);
        assert_eq!(parse_body("{").unwrap_err().code, crate::exit::USAGE);
    }
}
