use serde::Serialize;

use crate::cmd::ServersArgs;
use crate::config::{load_servers, DEFAULT_PORT};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_rows, OutputFormat};

#[derive(Serialize)]
struct ServerRow {
    id: String,
    name: String,
    rcon: Option<String>,
    crcon: Option<String>,
    tls: bool,
}

pub fn run(args: ServersArgs, format: OutputFormat) -> CliResult<i32> {
    let rows: Vec<ServerRow> = load_servers(&args.servers)?
        .into_iter()
        .map(|entry| ServerRow {
            id: entry.id.unwrap_or_default(),
            name: entry.name.unwrap_or_default(),
            rcon: entry
                .host
                .filter(|_| entry.rcon_password.is_some())
                .map(|host| format!("{host}:{}", entry.port.unwrap_or(DEFAULT_PORT))),
            crcon: entry.crcon_base.filter(|_| entry.token.is_some()),
            tls: entry.tls.unwrap_or(false),
        })
        .collect();

    print_rows(
        &rows,
        &["ID", "NAME", "RCON", "CRCON", "TLS"],
        |row| {
            vec![
                row.id.clone(),
                row.name.clone(),
                row.rcon.clone().unwrap_or_else(|| "-".to_string()),
                row.crcon.clone().unwrap_or_else(|| "-".to_string()),
                row.tls.to_string(),
            ]
        },
        format,
    );
    Ok(SUCCESS)
}
