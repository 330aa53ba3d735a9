//! Keyword and semantic search commands.

use anyhow::Result;
use serde_json::Value;

use crate::client::{urlencode, Client};
use crate::commands::print_json;
use crate::output;

pub async fn search(
    query: i64,
    q: String,
    path: Option<String>,
    limit: usize,
    mode: String,
    json_output: bool,
) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let mut url = format!(
        "/query/{query}/search?q={}&limit={limit}&mode={mode}",
        urlencode(&q)
    );
    if let Some(path) = path {
        url.push_str(&format!("&path={}", urlencode(&path)));
    }
    let response = client.get(&url).await?;
    render_results(&response, json_output, &["noteId", "path", "score", "snippet"])
}

pub async fn vsearch(
    query: i64,
    q: String,
    path: Option<String>,
    limit: usize,
    json_output: bool,
) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let mut url = format!(
        "/query/{query}/vsearch?q={}&limit={limit}",
        urlencode(&q)
    );
    if let Some(path) = path {
        url.push_str(&format!("&path={}", urlencode(&path)));
    }
    let response = client.get(&url).await?;

    if json_output {
        print_json(&response);
        return Ok(());
    }
    let results = response["results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() {
        output::info("no results");
        return Ok(());
    }
    // Trim chunks to previews for the table.
    let rows: Vec<Value> = results
        .iter()
        .map(|hit| {
            let mut row = hit.clone();
            if let Some(chunk) = hit["chunk"].as_str() {
                row["chunk"] = Value::String(output::preview(chunk, 60));
            }
            if let Some(score) = hit["score"].as_f64() {
                row["score"] = Value::String(format!("{score:.4}"));
            }
            row
        })
        .collect();
    println!("{}", output::json_table(&rows, &["noteId", "path", "score", "chunk"]));
    Ok(())
}

fn render_results(response: &Value, json_output: bool, columns: &[&str]) -> Result<()> {
    if json_output {
        print_json(response);
        return Ok(());
    }
    let results = response["results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() {
        output::info("no results");
        return Ok(());
    }
    let rows: Vec<Value> = results
        .iter()
        .map(|hit| {
            let mut row = hit.clone();
            if let Some(score) = hit["score"].as_f64() {
                row["score"] = Value::String(format!("{score:.4}"));
            }
            row
        })
        .collect();
    println!("{}", output::json_table(&rows, columns));
    Ok(())
}

