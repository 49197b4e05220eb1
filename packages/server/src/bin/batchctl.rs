//! CLI control plane for the batch service (spec.md §2 ambient stack,
//! grounded on `migrate_cli.rs`'s `Parser`/`Subcommand` shape). Talks to
//! the Front-End over its REST surface rather than the database directly,
//! so `batchctl` works the same whether it runs next to the FE or against
//! a remote deployment.
//!
//! Exit codes (spec.md §6): 0 success, 1 not-found, 2 validation failure.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "batchctl")]
#[command(about = "Control plane for the batch job service")]
struct Cli {
    /// Base URL of the Front-End, e.g. http://localhost:8080
    #[arg(long, env = "BATCHCTL_FE_URL", default_value = "http://localhost:8080")]
    fe_url: String,

    /// Caller identity forwarded as `X-Hail-User`.
    #[arg(long, env = "BATCHCTL_USER")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new open batch
    CreateBatch {
        #[arg(long)]
        billing_project: String,
        #[arg(long)]
        token: String,
        #[arg(long, default_value_t = 0)]
        n_jobs: i32,
        #[arg(long)]
        callback_url: Option<String>,
    },
    /// Close a batch, declaring its job count final
    Close { batch_id: i64 },
    /// Cancel all cancellable jobs in a batch
    Cancel { batch_id: i64 },
    /// Soft-delete a batch
    Delete { batch_id: i64 },
    /// Print a batch's current status
    Get { batch_id: i64 },
    /// List batches owned by the caller, optionally filtered by query
    List {
        #[arg(long, default_value = "")]
        q: String,
    },
    /// Print a job's current status
    GetJob { batch_id: i64, job_id: i64 },
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let result = match &cli.command {
        Commands::CreateBatch {
            billing_project,
            token,
            n_jobs,
            callback_url,
        } => {
            create_batch(
                &client,
                &cli,
                billing_project,
                token,
                *n_jobs,
                callback_url.as_deref(),
            )
            .await
        }
        Commands::Close { batch_id } => patch(&client, &cli, &format!("/batches/{batch_id}/close")).await,
        Commands::Cancel { batch_id } => patch(&client, &cli, &format!("/batches/{batch_id}/cancel")).await,
        Commands::Delete { batch_id } => delete(&client, &cli, &format!("/batches/{batch_id}")).await,
        Commands::Get { batch_id } => get(&client, &cli, &format!("/batches/{batch_id}")).await,
        Commands::List { q } => get(&client, &cli, &format!("/batches?q={}", urlencode(q))).await,
        Commands::GetJob { batch_id, job_id } => {
            get(&client, &cli, &format!("/batches/{batch_id}/jobs/{job_id}")).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CommandError::NotFound(msg)) => {
            print_error(&msg);
            ExitCode::from(1)
        }
        Err(CommandError::Validation(msg)) => {
            print_error(&msg);
            ExitCode::from(2)
        }
    }
}

enum CommandError {
    NotFound(String),
    Validation(String),
}

fn print_error(msg: &str) {
    let output = ErrorOutput { error: msg.to_string() };
    eprintln!("{}", serde_json::to_string(&output).unwrap());
}

fn url(cli: &Cli, path: &str) -> String {
    format!("{}/api/v1alpha{path}", cli.fe_url.trim_end_matches('/'))
}

async fn create_batch(
    client: &reqwest::Client,
    cli: &Cli,
    billing_project: &str,
    token: &str,
    n_jobs: i32,
    callback_url: Option<&str>,
) -> Result<(), CommandError> {
    let body = serde_json::json!({
        "billing_project": billing_project,
        "token": token,
        "n_jobs": n_jobs,
        "callback_url": callback_url,
    });
    let resp = client
        .post(url(cli, "/batches/create"))
        .header("X-Hail-User", &cli.user)
        .json(&body)
        .send()
        .await
        .map_err(transport_error)?;
    handle_response(resp).await
}

async fn patch(client: &reqwest::Client, cli: &Cli, path: &str) -> Result<(), CommandError> {
    let resp = client
        .patch(url(cli, path))
        .header("X-Hail-User", &cli.user)
        .send()
        .await
        .map_err(transport_error)?;
    handle_response(resp).await
}

async fn delete(client: &reqwest::Client, cli: &Cli, path: &str) -> Result<(), CommandError> {
    let resp = client
        .delete(url(cli, path))
        .header("X-Hail-User", &cli.user)
        .send()
        .await
        .map_err(transport_error)?;
    handle_response(resp).await
}

async fn get(client: &reqwest::Client, cli: &Cli, path: &str) -> Result<(), CommandError> {
    let resp = client
        .get(url(cli, path))
        .header("X-Hail-User", &cli.user)
        .send()
        .await
        .map_err(transport_error)?;
    handle_response(resp).await
}

async fn handle_response(resp: reqwest::Response) -> Result<(), CommandError> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);

    if status.is_success() {
        println!("{}", serde_json::to_string_pretty(&body).unwrap());
        return Ok(());
    }

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string();

    if status == reqwest::StatusCode::NOT_FOUND {
        Err(CommandError::NotFound(message))
    } else {
        Err(CommandError::Validation(message))
    }
}

fn transport_error(err: reqwest::Error) -> CommandError {
    CommandError::Validation(err.to_string())
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => c.to_string(),
            ' ' => "+".to_string(),
            other => other.to_string().bytes().map(|b| format!("%{b:02X}")).collect(),
        })
        .collect()
}
