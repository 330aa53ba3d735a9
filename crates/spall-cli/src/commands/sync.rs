//! `spall sync`: streaming ingestion with progress rendering.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::client::Client;
use crate::commands::corpus_id;
use crate::output;

pub async fn run(dir: PathBuf, glob: String, corpus: String, prefix: Option<String>) -> Result<()> {
    let dir = dir.canonicalize()?;
    let client = Client::connect_or_spawn().await?;
    let corpus = corpus_id(&client, &corpus).await?;

    let mut body = json!({
        "corpus": corpus,
        "dir": dir.to_string_lossy(),
        "glob": glob,
    });
    if let Some(prefix) = prefix {
        body["prefix"] = json!(prefix);
    }

    let mut events = client
        .stream(reqwest::Method::POST, "/sse/corpus/sync", Some(body))
        .await?;

    let mut added = 0u64;
    let mut modified = 0u64;
    let mut removed = 0u64;
    let mut bar: Option<ProgressBar> = None;
    let mut failed = false;

    while let Some(event) = events.next().await {
        match event["type"].as_str().unwrap_or("") {
            "scan.start" => {
                output::info(&format!("scanning {} files", event["numFiles"]));
            }
            "scan.progress" => {
                let path = event["path"].as_str().unwrap_or("?");
                match event["status"].as_str().unwrap_or("") {
                    "added" => {
                        added += 1;
                        println!("  {} {path}", "+".green());
                    }
                    "modified" => {
                        modified += 1;
                        println!("  {} {path}", "~".yellow());
                    }
                    "removed" => {
                        removed += 1;
                        println!("  {} {path}", "-".red());
                    }
                    _ => {}
                }
            }
            "embed.start" => {
                let total = event["numChunks"].as_u64().unwrap_or(0);
                if total > 0 {
                    let pb = ProgressBar::new(event["numFiles"].as_u64().unwrap_or(0));
                    pb.set_style(
                        ProgressStyle::with_template(
                            "  embedding [{bar:30}] {pos}/{len} files",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );
                    bar = Some(pb);
                }
            }
            "embed.progress" => {
                if let Some(pb) = &bar {
                    pb.set_position(event["numFilesProcessed"].as_u64().unwrap_or(0));
                }
            }
            "embed.done" => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
            }
            "error" => {
                failed = true;
                output::error(
                    event["error"]["message"]
                        .as_str()
                        .unwrap_or("sync failed"),
                );
            }
            _ => {}
        }
    }

    if failed {
        anyhow::bail!("sync failed");
    }
    output::success(&format!(
        "sync complete ({added} added, {modified} modified, {removed} removed)"
    ));
    Ok(())
}
