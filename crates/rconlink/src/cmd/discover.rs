use rconlink_session::OperationClass;

use crate::cmd::{parse_duration, select_executor, DiscoverArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_catalogue, OutputFormat};

pub async fn run(args: DiscoverArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let (server_id, registry) = args.target.resolve()?.into_registry()?;

    let executor = select_executor(&registry, &server_id, args.via, OperationClass::Read)?;
    let catalogue = executor.catalogue(timeout).await;
    let via = executor.kind();
    registry.shutdown().await;

    match catalogue {
        Some(catalogue) => {
            print_catalogue(&server_id, via.as_str(), &catalogue, format);
            Ok(SUCCESS)
        }
        None => Err(CliError::new(
            FAILURE,
            format!("command discovery unavailable on {server_id} via {via}"),
        )),
    }
}
