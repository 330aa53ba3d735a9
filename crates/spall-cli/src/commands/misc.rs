//! Commit, stats, and the event tail.

use anyhow::Result;
use futures_util::StreamExt;
use serde_json::json;

use crate::client::Client;
use crate::commands::print_json;
use crate::output;

pub async fn commit(json_output: bool) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let receipt = client.post("/commit/", json!({})).await?;
    if json_output {
        print_json(&receipt);
    } else {
        output::success(&format!(
            "committed {} access rows at {}",
            receipt["moved"], receipt["committedAt"]
        ));
    }
    Ok(())
}

pub async fn stats(json_output: bool) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let stats = client.get("/stats").await?;
    if json_output {
        print_json(&stats);
        return Ok(());
    }
    for key in ["corpora", "workspaces", "notes", "chunks", "staged"] {
        println!("{key:>12}: {}", stats[key]);
    }
    Ok(())
}

/// Tails the daemon's global event feed until interrupted or the
/// daemon stops.
pub async fn events() -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let mut stream = client
        .stream(reqwest::Method::GET, "/events", None)
        .await?;
    while let Some(event) = stream.next().await {
        println!("{event}");
    }
    Ok(())
}
