// crates/form-cli/src/main.rs

use std::sync::Arc;

use clap::{Parser, Subcommand};

use form_core::orchestrator::candidates::{self, GatingPolicy};
use form_core::orchestrator::persistence::PersistenceMode;
use form_core::orchestrator::{Orchestrator, OrchestratorConfig};
use form_core::repository::postgrest::PostgrestRepository;
use form_core::repository::{CandidateFetchParams, Repository};
use form_core::utils::logger;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the multi-process worker orchestrator for one targeting batch
    Orchestrator {
        #[clap(subcommand)]
        command: OrchestratorCommands,
    },
    /// Hosts the cloud-batch dispatcher's HTTP surface
    Dispatcher {
        #[clap(subcommand)]
        command: DispatcherCommands,
    },
    /// Runs a single browser-driving worker process
    Worker {
        #[clap(subcommand)]
        command: WorkerCommands,
    },
}

#[derive(Subcommand, Debug)]
enum OrchestratorCommands {
    /// Starts worker processes and drains candidates for a targeting id
    Run {
        #[clap(long)]
        targeting_id: i64,
        #[clap(long, default_value_t = 4)]
        worker_count: usize,
        #[clap(long, default_value = "form-sender-worker")]
        worker_binary: String,
        #[clap(long)]
        client_data: String,
        #[clap(long)]
        targeting_sql: String,
        #[clap(long)]
        ng_companies: Option<String>,
        #[clap(long, default_value_t = 50)]
        max_daily_sends: u32,
    },
}

#[derive(Subcommand, Debug)]
enum DispatcherCommands {
    /// Starts the dispatcher HTTP service
    Serve,
}

#[derive(Subcommand, Debug)]
enum WorkerCommands {
    /// Starts a single worker process
    Run {
        #[clap(long)]
        worker_id: String,
    },
}

fn env_required(key: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(key).map_err(|_| format!("missing required environment variable {key}").into())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init_logger()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Orchestrator { command: OrchestratorCommands::Run {
            targeting_id,
            worker_count,
            worker_binary,
            client_data,
            targeting_sql,
            ng_companies,
            max_daily_sends,
        } } => run_orchestrator(targeting_id, worker_count, worker_binary, client_data, targeting_sql, ng_companies, max_daily_sends).await,
        Commands::Dispatcher { command: DispatcherCommands::Serve } => exec_sibling_binary("form-sender-dispatcher", &[]).await,
        Commands::Worker { command: WorkerCommands::Run { worker_id } } => {
            exec_sibling_binary("form-sender-worker", &["--worker-id", &worker_id]).await
        }
    }
}

/// Re-execs a sibling binary with inherited stdio, the way a thin CLI
/// front-end hands off to the real long-running process instead of
/// duplicating its logic (spec.md §1 treats the CLI entry point itself
/// as out of scope; this just wires it to the binaries that matter).
async fn exec_sibling_binary(name: &str, args: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let status = tokio::process::Command::new(name).args(args).status().await?;
    if !status.success() {
        return Err(format!("{name} exited with {status}").into());
    }
    Ok(())
}

/// Starts the orchestrator, drains candidates for `targeting_id` in
/// batches of up to 10 (spec.md §4.2.2) until the business-hour/quota
/// gate closes or the 5h run deadline trips, then shuts down cleanly.
async fn run_orchestrator(
    targeting_id: i64,
    worker_count: usize,
    worker_binary: String,
    client_data: String,
    targeting_sql: String,
    ng_companies: Option<String>,
    max_daily_sends: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    candidates::validate_targeting_sql(&targeting_sql)?;
    if let Some(ng) = &ng_companies {
        candidates::validate_ng_companies(ng)?;
    }
    let client_data: serde_json::Value = serde_json::from_str(&client_data)?;

    let repo: Arc<dyn Repository> = Arc::new(PostgrestRepository::new(
        env_required("FORM_SENDER_DB_URL")?,
        env_required("FORM_SENDER_DB_API_KEY")?,
        env_or("COMPANY_TABLE", "companies"),
        env_or("SUBMISSIONS_TABLE", "send_queue"),
    ));

    let policy = GatingPolicy {
        send_days_of_week: vec![
            chrono::Weekday::Mon,
            chrono::Weekday::Tue,
            chrono::Weekday::Wed,
            chrono::Weekday::Thu,
            chrono::Weekday::Fri,
        ],
        send_start_minute: 9 * 60,
        send_end_minute: 18 * 60,
        max_daily_sends,
    };
    policy.validate()?;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig { worker_count, worker_binary, persistence_mode: PersistenceMode::Buffered, ..OrchestratorConfig::default() },
        repo.clone(),
    );
    orchestrator.start().await?;
    log::info!(target: "form_sender_cli", targeting_id, worker_count; "orchestrator started");

    let started_at = chrono::Utc::now();
    let mut next_start_id = 0i64;
    loop {
        let successes_today = repo.count_successes_today(targeting_id).await?;
        if !candidates::may_dispatch(&policy, started_at, successes_today) {
            log::info!(target: "form_sender_cli", targeting_id; "dispatch gate closed, stopping");
            break;
        }

        let candidates = repo
            .fetch_candidates(CandidateFetchParams {
                start_id: next_start_id,
                limit: 10,
                targeting_sql: targeting_sql.clone(),
                ng_companies: ng_companies.clone(),
            })
            .await?;
        if candidates.is_empty() {
            log::info!(target: "form_sender_cli", targeting_id; "no candidates remaining, stopping");
            break;
        }
        next_start_id = candidates.iter().map(|c| c.record_id).max().unwrap_or(next_start_id) + 1;

        let stats = orchestrator.process_batch(candidates, client_data.clone(), targeting_id).await?;
        log::info!(
            target: "form_sender_cli",
            processed = stats.processed, succeeded = stats.succeeded, failed = stats.failed;
            "batch complete"
        );
        if orchestrator.past_run_deadline() {
            break;
        }
    }

    orchestrator.shutdown(std::time::Duration::from_secs(30)).await?;
    Ok(())
}
