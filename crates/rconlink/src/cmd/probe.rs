use std::time::Instant;

use rconlink_session::RconClient;
use serde::Serialize;

use crate::cmd::{millis, parse_duration, ProbeArgs};
use crate::exit::{rcon_error, CliError, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat};

#[derive(Serialize)]
struct ProbeReport {
    server: String,
    addr: String,
    tls: bool,
    state: String,
    connect_ms: f64,
    connected: bool,
}

pub async fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let target = args.target.resolve()?;
    let addr = target.session_addr().unwrap_or_default();
    let descriptor = target
        .session
        .ok_or_else(|| CliError::usage("probe needs an RCON session (--host/--password)"))?;
    let tls = descriptor.tls;

    let client = RconClient::new(descriptor);
    let started = Instant::now();
    let connected = client.connect(timeout).await;
    let connect_ms = millis(started.elapsed());
    let state = client.state().await;
    client.close().await;
    connected.map_err(|err| rcon_error("probe failed", err))?;

    print_report(
        &ProbeReport {
            server: target.name,
            addr,
            tls,
            state: state.to_string(),
            connect_ms,
            connected: true,
        },
        format,
    );
    Ok(SUCCESS)
}
