use std::time::{Duration, Instant};

use rconlink_session::{Executor, OperationClass};
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cmd::{millis, parse_body, parse_duration, select_executor, Via, WatchArgs};
use crate::exit::{rcon_error, CliResult, REJECTED, SUCCESS};
use crate::output::{print_outcome, OutcomeOutput, OutputFormat};

pub async fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let timeout = parse_duration(&args.timeout)?;
    let body = parse_body(&args.body)?;
    let (server_id, registry) = args.target.resolve()?.into_registry()?;
    let executor = select_executor(&registry, &server_id, Via::Auto, OperationClass::Read)?;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut polls = 0usize;
    let mut code = SUCCESS;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = ticker.tick() => {
                code = poll(executor, &server_id, &args.command, body.clone(), timeout, format).await;
                polls = polls.saturating_add(1);
                if args.count.is_some_and(|count| polls >= count) {
                    break;
                }
            }
        }
    }

    registry.shutdown().await;
    Ok(code)
}

/// One poll; failures are reported and the watch carries on.
async fn poll(
    executor: &Executor,
    server_id: &str,
    command: &str,
    body: Value,
    timeout: Duration,
    format: OutputFormat,
) -> i32 {
    let started = Instant::now();
    match executor.execute(command, body, timeout).await {
        Ok(outcome) => {
            print_outcome(
                &OutcomeOutput {
                    server: server_id,
                    command,
                    via: executor.kind().as_str(),
                    elapsed_ms: millis(started.elapsed()),
                    outcome: &outcome,
                },
                format,
            );
            if outcome.is_completed() {
                SUCCESS
            } else {
                REJECTED
            }
        }
        Err(err) => {
            let err = rcon_error(&format!("{command} failed"), err);
            warn!(code = err.code, "{}", err.message);
            err.code
        }
    }
}
