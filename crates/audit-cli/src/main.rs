mod client;

use anyhow::{Context, Result};
use audit_core::{ExportFormat, HistoryFilter, OperationType};
use clap::{Parser, Subcommand};
use client::{NodeClient, OperationRequest};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "audit-cli")]
#[command(about = "CLI client for the audit ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, env = "AUDIT_NODE", default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record an operation
    Log {
        /// Operation type, e.g. TASK_COMPLETED
        #[arg(long = "type")]
        operation_type: OperationType,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        subject: Option<String>,
        /// Payload as a JSON document
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// List recorded operations, newest first
    History {
        #[arg(long = "type")]
        operation_type: Option<OperationType>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        /// Inclusive lower bound, milliseconds since the epoch
        #[arg(long)]
        since: Option<u64>,
        /// Inclusive upper bound, milliseconds since the epoch
        #[arg(long)]
        until: Option<u64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check one transaction's hash and where it sits
    Verify { id: String },
    /// Chain statistics
    Stats,
    /// Download the ledger as JSON or CSV
    Export {
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        /// Output file; defaults to the name suggested by the node
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Seal pending operations now
    Seal {
        /// Fail instead of waiting when a seal is already running
        #[arg(long)]
        no_wait: bool,
    },
    /// Validate the whole chain
    Validate,
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = NodeClient::new(cli.node);
    match cli.cmd {
        Command::Log {
            operation_type,
            actor,
            subject,
            payload,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;
            let receipt = client
                .log(&OperationRequest {
                    operation_type: operation_type.as_str(),
                    payload,
                    actor_id: &actor,
                    subject_id: subject.as_deref(),
                })
                .await?;
            print_json(&receipt)?;
        }
        Command::History {
            operation_type,
            actor,
            subject,
            since,
            until,
            limit,
        } => {
            let filter = HistoryFilter {
                operation_type,
                actor_id: actor,
                subject_id: subject,
                since,
                until,
                limit,
            };
            print_json(&client.history(&filter).await?)?;
        }
        Command::Verify { id } => print_json(&client.verify(&id).await?)?,
        Command::Stats => print_json(&client.stats().await?)?,
        Command::Export { format, out } => {
            let download = client.export(format).await?;
            let path = out
                .or_else(|| download.filename.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(format!("audit-ledger.{}", format.extension())));
            tokio::fs::write(&path, &download.body)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {} bytes to {}", download.body.len(), path.display());
        }
        Command::Seal { no_wait } => print_json(&client.seal(!no_wait).await?)?,
        Command::Validate => print_json(&client.validate().await?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_parses_operation_type_case_insensitively() {
        let cli = Cli::try_parse_from([
            "audit-cli",
            "log",
            "--type",
            "task_completed",
            "--actor",
            "driver-3",
            "--payload",
            "{\"taskId\":7}",
        ])
        .unwrap();
        match cli.cmd {
            Command::Log {
                operation_type,
                actor,
                subject,
                ..
            } => {
                assert_eq!(operation_type, OperationType::TaskCompleted);
                assert_eq!(actor, "driver-3");
                assert!(subject.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        assert!(Cli::try_parse_from(["audit-cli", "log", "--type", "NOPE", "--actor", "a"]).is_err());
    }

    #[test]
    fn export_defaults_to_json() {
        let cli = Cli::try_parse_from(["audit-cli", "--node", "http://h:1", "export"]).unwrap();
        assert_eq!(cli.node, "http://h:1");
        assert!(matches!(
            cli.cmd,
            Command::Export {
                format: ExportFormat::Json,
                out: None
            }
        ));
    }
}
