//! `stepforge sessions`: inspect and cancel sessions on a running server.

use anyhow::{bail, Result};
use clap::Subcommand;
use serde_json::Value;

use stepforge_core::Session;

use crate::terminal_output::{note_success, render_sessions, supports_color};

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List sessions, newest first
    List {
        /// Only sessions in this status
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one session and its steps
    Show { session_id: String },
    /// Request cancellation
    Cancel { session_id: String },
}

pub async fn run(base_url: &str, cmd: SessionCommands) -> Result<()> {
    let client = reqwest::Client::new();
    match cmd {
        SessionCommands::List { status, limit } => {
            let mut query = vec![("limit", limit.to_string())];
            if let Some(status) = status {
                query.push(("status", status));
            }
            let resp = client
                .get(format!("{base_url}/api/sessions"))
                .query(&query)
                .send()
                .await?;
            let body = checked(resp).await?;
            let sessions: Vec<Session> = serde_json::from_value(body["sessions"].clone())?;
            print!("{}", render_sessions(&sessions, supports_color()));
        }
        SessionCommands::Show { session_id } => {
            let session = checked(
                client
                    .get(format!("{base_url}/api/sessions/{session_id}"))
                    .send()
                    .await?,
            )
            .await?;
            let steps = checked(
                client
                    .get(format!("{base_url}/api/sessions/{session_id}/steps"))
                    .send()
                    .await?,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            for step in steps["steps"].as_array().into_iter().flatten() {
                println!("{}", serde_json::to_string(step)?);
            }
        }
        SessionCommands::Cancel { session_id } => {
            checked(
                client
                    .post(format!("{base_url}/api/sessions/{session_id}/cancel"))
                    .send()
                    .await?,
            )
            .await?;
            note_success(&format!("Cancellation requested for {session_id}"));
        }
    }
    Ok(())
}

/// Body of a successful response, or the server's error message.
async fn checked(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body["error"]["message"].as_str().unwrap_or("request failed");
        bail!("{status}: {message}");
    }
    Ok(body)
}
