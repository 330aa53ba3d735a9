//! Note commands: add, get, ls.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::json;

use crate::client::{urlencode, Client};
use crate::commands::{corpus_id, print_json};
use crate::output;

pub async fn add(
    path: String,
    file: Option<PathBuf>,
    corpus: String,
    dupe: bool,
    json_output: bool,
) -> Result<()> {
    let content = match file {
        Some(file) => std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let client = Client::connect_or_spawn().await?;
    let corpus = corpus_id(&client, &corpus).await?;
    let note = client
        .post(
            "/corpus/note",
            json!({"corpus": corpus, "path": path, "content": content, "dupe": dupe}),
        )
        .await?;

    if json_output {
        print_json(&note);
    } else {
        output::success(&format!(
            "added {} ({} bytes)",
            note["path"].as_str().unwrap_or("?"),
            note["size"]
        ));
    }
    Ok(())
}

/// Upsert through the streaming endpoint so the note is re-embedded
/// and progress is visible.
pub async fn put(
    path: String,
    file: Option<PathBuf>,
    corpus: String,
    dupe: bool,
) -> Result<()> {
    use futures_util::StreamExt;

    let content = match file {
        Some(file) => std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let client = Client::connect_or_spawn().await?;
    let corpus = corpus_id(&client, &corpus).await?;
    let mut events = client
        .stream(
            reqwest::Method::PUT,
            &format!("/sse/corpus/{corpus}/note/{}", urlencode(&path)),
            Some(json!({"content": content, "dupe": dupe})),
        )
        .await?;

    let mut failed = false;
    let mut stored: Option<String> = None;
    while let Some(event) = events.next().await {
        match event["type"].as_str().unwrap_or("") {
            "note.created" | "note.updated" => {
                stored = event["info"]["path"].as_str().map(str::to_string);
            }
            "embed.done" => {}
            "error" => {
                failed = true;
                output::error(event["error"]["message"].as_str().unwrap_or("put failed"));
            }
            _ => {}
        }
    }
    if failed {
        anyhow::bail!("put failed");
    }
    output::success(&format!(
        "stored and embedded {}",
        stored.as_deref().unwrap_or(&path)
    ));
    Ok(())
}

pub async fn get(corpus: String, path: String) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let corpus = corpus_id(&client, &corpus).await?;
    let note = client
        .get(&format!("/corpus/{corpus}/note/{}", urlencode(&path)))
        .await?;
    print!("{}", note["content"].as_str().unwrap_or(""));
    Ok(())
}

pub async fn ls(
    corpus: String,
    path: Option<String>,
    after: Option<String>,
    limit: usize,
    json_output: bool,
) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let corpus = corpus_id(&client, &corpus).await?;

    let mut url = format!("/corpus/{corpus}/notes?limit={limit}");
    if let Some(path) = path {
        url.push_str(&format!("&path={}", urlencode(&path)));
    }
    if let Some(after) = after {
        url.push_str(&format!("&after={}", urlencode(&after)));
    }
    let page = client.get(&url).await?;

    if json_output {
        print_json(&page);
        return Ok(());
    }

    let notes = page["notes"].as_array().cloned().unwrap_or_default();
    if notes.is_empty() {
        output::info("no notes");
        return Ok(());
    }
    println!("{}", output::json_table(&notes, &["id", "path", "size"]));
    if let Some(cursor) = page["nextCursor"].as_str() {
        output::info(&format!("more: --after {cursor}"));
    }
    Ok(())
}
