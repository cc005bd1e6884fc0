use std::time::{Duration, Instant};

use rconlink_session::{CommandCheck, OperationClass, ServerRegistry};
use serde_json::Value;
use tracing::warn;

use crate::cmd::{millis, parse_body, parse_duration, select_executor, ExecArgs};
use crate::exit::{rcon_error, CliError, CliResult, REJECTED, SUCCESS};
use crate::output::{print_outcome, OutcomeOutput, OutputFormat};

pub async fn run(args: ExecArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let body = parse_body(&args.body)?;
    let (server_id, registry) = args.target.resolve()?.into_registry()?;

    let result = execute(&registry, &server_id, &args, body, timeout, format).await;
    registry.shutdown().await;
    result
}

async fn execute(
    registry: &ServerRegistry,
    server_id: &str,
    args: &ExecArgs,
    body: Value,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let class = if args.read {
        OperationClass::Read
    } else {
        OperationClass::Write
    };
    let executor = select_executor(registry, server_id, args.via, class)?;

    if args.check {
        match executor.check_command(&args.command, timeout).await {
            CommandCheck::Known => {}
            CommandCheck::Unknown => {
                return Err(CliError::usage(format!(
                    "server '{server_id}' does not support {}",
                    args.command
                )));
            }
            CommandCheck::Unverified => {
                warn!(command = %args.command, "command list unavailable, sending unverified");
            }
        }
    }

    let started = Instant::now();
    let outcome = executor
        .execute(&args.command, body, timeout)
        .await
        .map_err(|err| rcon_error(&format!("{} failed", args.command), err))?;

    print_outcome(
        &OutcomeOutput {
            server: server_id,
            command: &args.command,
            via: executor.kind().as_str(),
            elapsed_ms: millis(started.elapsed()),
            outcome: &outcome,
        },
        format,
    );

    Ok(if outcome.is_completed() {
        SUCCESS
    } else {
        REJECTED
    })
}
