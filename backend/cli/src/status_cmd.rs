//! `stepforge status`: health of a running server.

use anyhow::Result;
use serde_json::Value;

use crate::terminal_output::{note_success, note_warn};

pub async fn run(base_url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    match client.get(format!("{base_url}/api/health")).send().await {
        Ok(resp) => {
            let body: Value = resp.json().await?;
            note_success(&format!(
                "stepforge {} up for {}s, {} active session(s)",
                body["version"].as_str().unwrap_or("?"),
                body["uptime_seconds"].as_u64().unwrap_or(0),
                body["active_sessions"].as_u64().unwrap_or(0),
            ));
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Err(_) => note_warn(&format!("stepforge is not running at {base_url}")),
    }
    Ok(())
}
