//! Escrow Jobs CLI
//!
//! Drives the job lifecycle against the configured payment service and a
//! SQLite job store.
//!
//! Run modes:
//!   cargo run                                      - Show usage
//!   cargo run -- create-job <purchaser> <json>     - Create a job and wait for payment
//!   cargo run -- poll <job_id>                     - Poll once for locked funds
//!   cargo run -- status <job_id>                   - Show job status
//!   cargo run -- complete <job_id> <json>          - Complete and submit the result
//!   cargo run -- fail <job_id> <message>           - Mark a job failed
//!   cargo run -- lock-funds <job_id>               - Lock purchaser funds
//!   cargo run -- hash <purchaser> <json>           - Print input and result hashes
//!   cargo run -- config                            - Show loaded configuration

use escrow_jobs::common::{generate_correlation_id, init_from_config, GateConfig, GateError};
use escrow_jobs::{
    input_hash, result_hash, BackgroundNotifier, JobController, LifecycleSettings, PaymentClient,
    PaymentLedger, PollReport, SqliteJobStore, StatusUpdate,
};
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "hash" => run_hash(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        command => run_command(command, &args[2..]).await,
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Escrow Jobs - Payment-Gated Job Lifecycle");
    println!();
    println!("Usage:");
    println!("  escrow-jobs create-job <purchaser_id> <input-json>   Create a job, then wait for payment");
    println!("  escrow-jobs poll <job_id>                            Poll once for locked funds");
    println!("  escrow-jobs status <job_id>                          Show job status");
    println!("  escrow-jobs complete <job_id> <result-json> [--local] Complete a running job");
    println!("  escrow-jobs fail <job_id> <message>                  Mark a job failed");
    println!("  escrow-jobs lock-funds <job_id>                      Lock purchaser funds for a job");
    println!("  escrow-jobs hash <purchaser_id> <json>               Print input and result hashes");
    println!("  escrow-jobs config                                   Show loaded configuration");
    println!();
    println!("Environment Variables:");
    println!("  ESCROW_PAYMENT_URL       Payment service base URL");
    println!("  ESCROW_API_KEY           Payment service API key");
    println!("  ESCROW_AGENT_IDENTIFIER  Registered agent identifier");
    println!("  ESCROW_SELLER_VKEY       Seller verification key (lock-funds only)");
    println!("  ESCROW_NETWORK           preprod or mainnet (default: preprod)");
    println!("  ESCROW_DB_PATH           SQLite job store (default: data/jobs.db)");
    println!();
    println!("A .env file in the working directory is loaded if present.");
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str, GateError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| GateError::validation(format!("missing argument <{}>", name)))
}

fn parse_json(raw: &str, name: &str) -> Result<Value, GateError> {
    serde_json::from_str(raw)
        .map_err(|e| GateError::validation(format!("<{}> is not valid JSON: {}", name, e)))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render output: {}", e),
    }
}

/// Hashes need no configuration or network access
fn run_hash(args: &[String]) -> Result<(), GateError> {
    let purchaser_id = arg(args, 0, "purchaser_id")?;
    let value = parse_json(arg(args, 1, "json")?, "json")?;

    println!("Input hash:  {}", input_hash(purchaser_id, &value)?);
    println!("Result hash: {}", result_hash(purchaser_id, &value)?);
    Ok(())
}

async fn run_command(command: &str, args: &[String]) -> Result<(), GateError> {
    let config = GateConfig::from_env()?;
    init_from_config(&config)?;

    tracing::info!(
        target: "escrow_jobs::job",
        correlation_id = %generate_correlation_id(),
        command,
        "cli invocation"
    );

    if command == "config" {
        config.print_summary();
        return Ok(());
    }

    let store = SqliteJobStore::new(&config.db_path)?;
    let client = PaymentClient::new(config.payment.clone())?;
    let (notifier, mut rx) = BackgroundNotifier::channel();
    let controller = Arc::new(JobController::new(
        Arc::new(store),
        Arc::new(client),
        notifier,
        LifecycleSettings::from(&config),
    ));

    match command {
        "create-job" => {
            let purchaser_id = arg(args, 0, "purchaser_id")?;
            let input = parse_json(arg(args, 1, "input-json")?, "input-json")?;

            let job = controller.create_job(purchaser_id, input).await?;
            println!("Job created, waiting for payment:");
            print_json(&job);

            // Drain the queued poll request in the foreground
            if let Some(request) = rx.recv().await {
                let report = controller.handle_poll_request(request).await?;
                return finish_poll(&report);
            }
            Ok(())
        }
        "poll" => {
            let job_id = arg(args, 0, "job_id")?;
            let report = controller.poll_and_advance(job_id, &config.poll).await?;
            finish_poll(&report)
        }
        "status" => {
            let job_id = arg(args, 0, "job_id")?;
            print_json(&controller.job_status(job_id).await?);
            Ok(())
        }
        "complete" => {
            let job_id = arg(args, 0, "job_id")?;
            let result = parse_json(arg(args, 1, "result-json")?, "result-json")?;
            let local = args.iter().skip(2).any(|a| a == "--local");

            let ledger: Option<&dyn PaymentLedger> = if local {
                None
            } else {
                Some(controller.ledger())
            };
            let job = controller
                .update_status(job_id, StatusUpdate::completed(result), ledger)
                .await?;
            print_json(&job);
            Ok(())
        }
        "fail" => {
            let job_id = arg(args, 0, "job_id")?;
            let message = args[1..].join(" ");
            let job = controller
                .update_status(job_id, StatusUpdate::failed(message), None)
                .await?;
            print_json(&job);
            Ok(())
        }
        "lock-funds" => {
            let job_id = arg(args, 0, "job_id")?;
            let locked = controller.lock_funds(job_id).await?;
            println!("Funds lock submitted:");
            print_json(&locked.raw);

            match controller.purchase_state(job_id).await? {
                Some(state) => println!(
                    "Purchase state: {}",
                    state.on_chain_state.as_deref().unwrap_or("pending")
                ),
                None => println!("Purchase not listed yet"),
            }
            Ok(())
        }
        other => {
            print_usage();
            Err(GateError::validation(format!("unknown command: {}", other)))
        }
    }
}

fn finish_poll(report: &PollReport) -> Result<(), GateError> {
    print_json(&report.job);

    match &report.outcome {
        Some(outcome) => {
            println!("Poll: {}", outcome);
            match GateError::from_poll_outcome(report.job.job_id(), outcome) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        None => {
            println!("No poll needed (status: {})", report.job.status());
            Ok(())
        }
    }
}
