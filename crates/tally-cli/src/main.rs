//! # tally CLI entry point
//!
//! Operator console for the Tally escrow stack. A thin HTTP client over
//! the admin surface of `tally-api`: dispute resolution and escalation,
//! mediator/arbitrator assignment, and dead-letter remediation.

use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Tally operator console.
///
/// Every command is a thin wrapper over the corresponding API operation;
/// all business rules are enforced server-side.
#[derive(Parser, Debug)]
#[command(name = "tally", version, about, long_about = None)]
struct Cli {
    /// Base URL of the tally-api instance.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    api_url: String,

    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a dispute with a final split.
    Resolve {
        /// The dispute to resolve.
        #[arg(long)]
        dispute: Uuid,
        /// Minor units to the freelancer.
        #[arg(long)]
        to_freelancer: i64,
        /// Minor units back to the client.
        #[arg(long)]
        to_client: i64,
        /// The admin user making the decision.
        #[arg(long)]
        decided_by: Uuid,
    },

    /// Escalate a dispute to a human decision-maker.
    Escalate {
        /// The dispute to escalate.
        #[arg(long)]
        dispute: Uuid,
        /// Why automated handling is insufficient.
        #[arg(long)]
        reason: String,
        /// The admin user escalating.
        #[arg(long)]
        actor: Uuid,
    },

    /// Assign a mediator or arbitrator to a dispute.
    Assign {
        /// The dispute to assign.
        #[arg(long)]
        dispute: Uuid,
        /// The user taking the role.
        #[arg(long)]
        user: Uuid,
        /// `mediator` or `arbitrator`.
        #[arg(long)]
        role: String,
        /// The admin user assigning.
        #[arg(long)]
        actor: Uuid,
    },

    /// Inspect and requeue dead-lettered jobs.
    DeadLetter {
        #[command(subcommand)]
        command: DeadLetterCommands,
    },

    /// Show a user's wallet.
    Wallet {
        /// The wallet owner.
        #[arg(long)]
        user: Uuid,
    },
}

#[derive(Subcommand, Debug)]
enum DeadLetterCommands {
    /// List every dead-lettered job.
    List,
    /// Requeue one dead-lettered job with a fresh attempt budget.
    Requeue {
        /// The job to requeue.
        #[arg(long)]
        job: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let base = cli.api_url.trim_end_matches('/');

    match cli.command {
        Commands::Resolve {
            dispute,
            to_freelancer,
            to_client,
            decided_by,
        } => {
            let body = serde_json::json!({
                "amount_to_freelancer": to_freelancer,
                "amount_to_client": to_client,
                "decided_by": {"kind": "admin", "user": decided_by},
            });
            let url = format!("{base}/v1/disputes/{dispute}/resolve");
            print_response(client.post(&url).json(&body).send().await?).await
        }
        Commands::Escalate {
            dispute,
            reason,
            actor,
        } => {
            let body = serde_json::json!({
                "reason": reason,
                "actor": {"kind": "admin", "user": actor},
            });
            let url = format!("{base}/v1/disputes/{dispute}/escalate");
            print_response(client.post(&url).json(&body).send().await?).await
        }
        Commands::Assign {
            dispute,
            user,
            role,
            actor,
        } => {
            let role = match role.as_str() {
                "mediator" => "Mediator",
                "arbitrator" => "Arbitrator",
                other => bail!("unknown role \"{other}\", expected mediator or arbitrator"),
            };
            let body = serde_json::json!({
                "user": user,
                "role": role,
                "actor": {"kind": "admin", "user": actor},
            });
            let url = format!("{base}/v1/disputes/{dispute}/assign");
            print_response(client.post(&url).json(&body).send().await?).await
        }
        Commands::DeadLetter { command } => match command {
            DeadLetterCommands::List => {
                let url = format!("{base}/v1/jobs/dead-letter");
                print_response(client.get(&url).send().await?).await
            }
            DeadLetterCommands::Requeue { job } => {
                let url = format!("{base}/v1/jobs/{job}/requeue");
                print_response(client.post(&url).send().await?).await
            }
        },
        Commands::Wallet { user } => {
            let url = format!("{base}/v1/wallets/{user}");
            print_response(client.get(&url).send().await?).await
        }
    }
}

async fn print_response(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("response body was not JSON")?;
    let rendered = serde_json::to_string_pretty(&body)?;
    if status.is_success() {
        println!("{rendered}");
        Ok(())
    } else {
        bail!("API returned {status}:\n{rendered}");
    }
}
