use anyhow::Result;
use clap::Parser;
use tracing_subscriber::prelude::*;

use spall_cli::{cli::{Cli, Commands}, commands, output};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let serving = matches!(cli.command, Commands::Serve { .. });
    let default_level = if cli.verbose {
        "debug"
    } else if serving {
        "info"
    } else {
        "warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "spall_cli={default_level},spall_daemon={default_level},spall_pipeline={default_level},spall_sqlite={default_level},spall_llm={default_level}"
        ))
    });

    // The daemon also appends its log under the data directory.
    let mut _log_guard = None;
    let file_layer = if serving {
        let settings = spall_core::Settings::from_env();
        std::fs::create_dir_all(&settings.data_dir).ok();
        let appender = tracing_appender::rolling::never(&settings.data_dir, "spall.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _log_guard = Some(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    if let Err(e) = run(cli).await {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Serve { force, persist } => commands::daemon::serve(force, persist).await,

        Commands::Daemon(cmd) => commands::daemon::handle(cmd).await,

        Commands::Sync {
            dir,
            glob,
            corpus,
            prefix,
        } => commands::sync::run(dir, glob, corpus, prefix).await,

        Commands::Add {
            path,
            file,
            corpus,
            dupe,
        } => commands::notes::add(path, file, corpus, dupe, json).await,

        Commands::Put {
            path,
            file,
            corpus,
            dupe,
        } => commands::notes::put(path, file, corpus, dupe).await,

        Commands::Get { corpus, path } => commands::notes::get(corpus, path).await,

        Commands::Ls {
            corpus,
            path,
            after,
            limit,
        } => commands::notes::ls(corpus, path, after, limit, json).await,

        Commands::Search {
            query,
            q,
            path,
            limit,
            mode,
        } => commands::search::search(query, q, path, limit, mode, json).await,

        Commands::Vsearch {
            query,
            q,
            path,
            limit,
        } => commands::search::vsearch(query, q, path, limit, json).await,

        Commands::Query(cmd) => commands::query::handle(cmd, json).await,

        Commands::Fetch { query, ids } => commands::query::fetch(query, ids, json).await,

        Commands::Paths { query, path } => commands::query::paths(query, path, json).await,

        Commands::Corpus(cmd) => commands::admin::corpus(cmd, json).await,

        Commands::Workspace(cmd) => commands::admin::workspace(cmd, json).await,

        Commands::Commit => commands::misc::commit(json).await,

        Commands::Stats => commands::misc::stats(json).await,

        Commands::Events => commands::misc::events().await,
    }
}
