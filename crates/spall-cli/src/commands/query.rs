//! Query scope commands plus fetch and paths.

use anyhow::Result;
use serde_json::json;

use spall_core::settings::discover_workspace_config;

use crate::cli::QueryCommands;
use crate::client::{urlencode, Client};
use crate::commands::{corpus_id, print_json, workspace_id};
use crate::output;

pub async fn handle(cmd: QueryCommands, json_output: bool) -> Result<()> {
    match cmd {
        QueryCommands::Create {
            viewer,
            corpora,
            tracked,
        } => create(viewer, corpora, tracked, json_output).await,
        QueryCommands::Recent { limit } => recent(limit, json_output).await,
        QueryCommands::Show { id } => show(id).await,
    }
}

/// Creates a query scope. Falls back to the repository's
/// `.spall/spall.json` for the viewer name and read scope.
async fn create(
    viewer: Option<String>,
    corpora: Vec<String>,
    tracked: bool,
    json_output: bool,
) -> Result<()> {
    let config = std::env::current_dir()
        .ok()
        .and_then(|cwd| discover_workspace_config(&cwd))
        .map(|(_, config)| config);

    let viewer_name = viewer
        .or_else(|| config.as_ref().map(|c| c.workspace.name.clone()))
        .unwrap_or_else(whoami);
    let corpus_names: Vec<String> = if corpora.is_empty() {
        match &config {
            Some(c) if !c.scope.read.is_empty() => c.scope.read.clone(),
            _ => vec!["default".to_string()],
        }
    } else {
        corpora
    };

    let client = Client::connect_or_spawn().await?;
    let viewer = workspace_id(&client, &viewer_name).await?;
    let mut corpus_ids = Vec::with_capacity(corpus_names.len());
    for name in &corpus_names {
        corpus_ids.push(corpus_id(&client, name).await?);
    }

    let query = client
        .post(
            "/query/",
            json!({"viewer": viewer, "tracked": tracked, "corpora": corpus_ids}),
        )
        .await?;

    if json_output {
        print_json(&query);
    } else {
        output::success(&format!(
            "query {} (viewer {viewer_name}, corpora {})",
            query["id"],
            corpus_names.join(", ")
        ));
    }
    Ok(())
}

async fn recent(limit: usize, json_output: bool) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let response = client.get(&format!("/query/recent?limit={limit}")).await?;
    if json_output {
        print_json(&response);
        return Ok(());
    }
    let queries = response["queries"].as_array().cloned().unwrap_or_default();
    if queries.is_empty() {
        output::info("no queries");
        return Ok(());
    }
    println!(
        "{}",
        output::json_table(&queries, &["id", "viewer", "tracked", "corpora"])
    );
    Ok(())
}

async fn show(id: i64) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let query = client.get(&format!("/query/{id}")).await?;
    print_json(&query);
    Ok(())
}

pub async fn fetch(query: i64, ids: Vec<i64>, json_output: bool) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let response = client
        .post(&format!("/query/{query}/fetch"), json!({ "ids": ids }))
        .await?;
    if json_output {
        print_json(&response);
        return Ok(());
    }
    for note in response["notes"].as_array().cloned().unwrap_or_default() {
        println!("{}", note["path"].as_str().unwrap_or("?"));
        println!("{}", note["content"].as_str().unwrap_or(""));
        println!();
    }
    Ok(())
}

pub async fn paths(query: i64, path: Option<String>, json_output: bool) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    let mut url = format!("/query/{query}/paths");
    if let Some(path) = path {
        url.push_str(&format!("?path={}", urlencode(&path)));
    }
    let response = client.get(&url).await?;
    if json_output {
        print_json(&response);
        return Ok(());
    }
    for group in response["paths"].as_array().cloned().unwrap_or_default() {
        println!("corpus {}", group["corpus"]);
        for path in group["paths"].as_array().cloned().unwrap_or_default() {
            println!("  {}", path.as_str().unwrap_or("?"));
        }
    }
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "default".to_string())
}
