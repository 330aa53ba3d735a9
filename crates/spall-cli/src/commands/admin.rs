//! Corpus and workspace management.

use anyhow::Result;
use serde_json::json;

use crate::cli::{CorpusCommands, WorkspaceCommands};
use crate::client::Client;
use crate::commands::print_json;
use crate::output;

pub async fn corpus(cmd: CorpusCommands, json_output: bool) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    match cmd {
        CorpusCommands::List => {
            let corpora = client.get("/corpus/list").await?;
            if json_output {
                print_json(&corpora);
            } else {
                let rows = corpora.as_array().cloned().unwrap_or_default();
                println!("{}", output::json_table(&rows, &["id", "name"]));
            }
        }
        CorpusCommands::Create { name } => {
            let corpus = client.post("/corpus/", json!({ "name": name })).await?;
            if json_output {
                print_json(&corpus);
            } else {
                output::success(&format!("corpus {} (id {})", name, corpus["id"]));
            }
        }
        CorpusCommands::Rm { id } => {
            client.delete(&format!("/corpus/{id}")).await?;
            output::success(&format!("removed corpus {id}"));
        }
    }
    Ok(())
}

pub async fn workspace(cmd: WorkspaceCommands, json_output: bool) -> Result<()> {
    let client = Client::connect_or_spawn().await?;
    match cmd {
        WorkspaceCommands::List => {
            let workspaces = client.get("/workspace/list").await?;
            if json_output {
                print_json(&workspaces);
            } else {
                let rows = workspaces.as_array().cloned().unwrap_or_default();
                println!("{}", output::json_table(&rows, &["id", "name"]));
            }
        }
        WorkspaceCommands::Create { name } => {
            let workspace = client.post("/workspace/", json!({ "name": name })).await?;
            if json_output {
                print_json(&workspace);
            } else {
                output::success(&format!("workspace {} (id {})", name, workspace["id"]));
            }
        }
        WorkspaceCommands::Rm { id } => {
            client.delete(&format!("/workspace/{id}")).await?;
            output::success(&format!("removed workspace {id}"));
        }
    }
    Ok(())
}
