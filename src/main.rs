use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::Parser;
use fractonring_core::{RendezvousRing, Reply, RequestOptions, RespBackend, ShardRouter};
use serde::Serialize;
use tracing::{Level, warn};

use crate::cli::{Cli, CliError, Cmd, LogFormat};
use crate::report::Placement;

mod cli;
mod report;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so command output stays machine-readable.
fn init_tracing(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = cli.ring_config()?;

    match &cli.command {
        Cmd::Locate { keys } => {
            let ring = RendezvousRing::from_nodes(config.names())?;
            let placements: Vec<Placement> =
                keys.iter().map(|key| Placement { key, shard: ring.lookup(key) }).collect();
            if cli.json {
                emit_json(&placements)?;
            } else {
                for p in &placements {
                    println!("{}\t{}", p.key, p.shard.unwrap_or("-"));
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Cmd::Distribution { keys, prefix } => {
            let ring = RendezvousRing::from_nodes(config.names())?;
            let mut counts: BTreeMap<String, usize> =
                ring.nodes().iter().map(|n| (n.clone(), 0)).collect();
            for i in 0..*keys {
                if let Some(shard) = ring.lookup(&format!("{prefix}{i}")) {
                    *counts.entry(shard.to_owned()).or_default() += 1;
                }
            }
            let shares = report::shares(counts, *keys);
            if cli.json {
                emit_json(&shares)?;
            } else {
                println!("{}", report::render_shares(&shares));
            }
            Ok(ExitCode::SUCCESS)
        }

        command => {
            let (router, errors) = ShardRouter::<RespBackend>::connect(&config).await?;
            for status in report::init_statuses(config.names(), &errors) {
                if let Some(e) = status.error {
                    warn!(shard = %status.shard, error = %e, "shard is not healthy");
                }
            }
            execute(&cli, command, &router).await
        }
    }
}

async fn execute(
    cli: &Cli,
    command: &Cmd,
    router: &ShardRouter<RespBackend>,
) -> Result<ExitCode, CliError> {
    let options = RequestOptions::default();

    match command {
        Cmd::Get { key } => match router.get(key, &options).await? {
            Reply::Ready(Some(value)) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(ExitCode::SUCCESS)
            }
            Reply::Ready(None) => {
                println!("(nil)");
                Ok(ExitCode::SUCCESS)
            }
            Reply::TimedOut | Reply::Cancelled => {
                eprintln!("(timeout)");
                Ok(ExitCode::FAILURE)
            }
        },

        Cmd::Set { key, value, ex } => {
            match router.set(key, value.clone(), *ex, &options).await? {
                Reply::Ready(()) => {
                    println!("OK");
                    Ok(ExitCode::SUCCESS)
                }
                Reply::TimedOut | Reply::Cancelled => {
                    eprintln!("(timeout, the write may still be applied)");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Cmd::Flush { yes } => {
            if !yes {
                return Err(CliError::FlushNotConfirmed);
            }
            let statuses = report::statuses(&router.flush_all().await);
            print_statuses(cli.json, &statuses)
        }

        Cmd::Health => {
            let statuses = report::statuses(&router.health_check().await);
            print_statuses(cli.json, &statuses)
        }

        Cmd::Locate { .. } | Cmd::Distribution { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn print_statuses(json: bool, statuses: &[report::ShardStatus]) -> Result<ExitCode, CliError> {
    if json {
        emit_json(&statuses)?;
    } else {
        println!("{}", report::render_statuses(statuses));
    }
    if statuses.iter().all(|s| s.ok) { Ok(ExitCode::SUCCESS) } else { Ok(ExitCode::FAILURE) }
}

fn emit_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
