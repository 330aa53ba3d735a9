pub mod admin;
pub mod daemon;
pub mod misc;
pub mod notes;
pub mod query;
pub mod search;
pub mod sync;

use anyhow::Result;
use serde_json::Value;

use crate::client::Client;

/// Resolves a corpus name to its id, creating the corpus if needed
/// (get-or-create is the POST contract).
pub async fn corpus_id(client: &Client, name: &str) -> Result<i64> {
    let corpus = client
        .post("/corpus/", serde_json::json!({ "name": name }))
        .await?;
    corpus["id"]
        .as_i64()
        .ok_or_else(|| anyhow::anyhow!("malformed corpus response: {corpus}"))
}

/// Resolves a workspace name to its id, creating it if needed.
pub async fn workspace_id(client: &Client, name: &str) -> Result<i64> {
    let workspace = client
        .post("/workspace/", serde_json::json!({ "name": name }))
        .await?;
    workspace["id"]
        .as_i64()
        .ok_or_else(|| anyhow::anyhow!("malformed workspace response: {workspace}"))
}

pub fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
