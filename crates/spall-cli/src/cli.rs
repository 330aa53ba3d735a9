use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spall")]
#[command(about = "spall - local semantic note store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon in the foreground
    Serve {
        /// Take over a live daemon's lock
        #[arg(long)]
        force: bool,

        /// Disable idle auto-shutdown
        #[arg(long)]
        persist: bool,
    },

    /// Daemon management
    #[command(subcommand)]
    Daemon(DaemonCommands),

    /// Sync a directory tree into a corpus (streams progress)
    Sync {
        /// Source directory
        dir: PathBuf,

        /// Glob pattern relative to the directory
        #[arg(short, long, default_value = "**/*.md")]
        glob: String,

        /// Target corpus name
        #[arg(short, long, default_value = "default")]
        corpus: String,

        /// Path prefix to store notes under
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Add a single note
    Add {
        /// Stored path for the note
        path: String,

        /// Read content from this file (stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Target corpus name
        #[arg(short, long, default_value = "default")]
        corpus: String,

        /// Allow duplicate content within the corpus
        #[arg(long)]
        dupe: bool,
    },

    /// Insert or replace a note and re-embed it (streams progress)
    Put {
        /// Stored path for the note
        path: String,

        /// Read content from this file (stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Target corpus name
        #[arg(short, long, default_value = "default")]
        corpus: String,

        /// Allow duplicate content within the corpus
        #[arg(long)]
        dupe: bool,
    },

    /// Print a note's content
    Get {
        /// Corpus name
        #[arg(short, long, default_value = "default")]
        corpus: String,

        /// Note path
        path: String,
    },

    /// List notes in a corpus (keyset-paginated)
    Ls {
        /// Corpus name
        #[arg(short, long, default_value = "default")]
        corpus: String,

        /// Path glob filter
        #[arg(short, long)]
        path: Option<String>,

        /// Resume after this cursor
        #[arg(long)]
        after: Option<String>,

        /// Page size
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Keyword search within a query scope
    Search {
        /// Query id
        query: i64,

        /// Search terms
        q: String,

        /// Path glob filter
        #[arg(short, long)]
        path: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Match mode: plain (tokenized) or fts (raw FTS expression)
        #[arg(short, long, default_value = "plain")]
        mode: String,
    },

    /// Semantic search within a query scope
    Vsearch {
        /// Query id
        query: i64,

        /// Search text
        q: String,

        /// Path glob filter
        #[arg(short, long)]
        path: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Query scope management
    #[command(subcommand)]
    Query(QueryCommands),

    /// Fetch full notes by id through a query (tracked queries record
    /// the reads)
    Fetch {
        /// Query id
        query: i64,

        /// Note ids
        ids: Vec<i64>,
    },

    /// List note paths in scope, grouped by corpus
    Paths {
        /// Query id
        query: i64,

        /// Path glob filter
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Corpus management
    #[command(subcommand)]
    Corpus(CorpusCommands),

    /// Workspace management
    #[command(subcommand)]
    Workspace(WorkspaceCommands),

    /// Move all staged access rows to the committed log
    Commit,

    /// Show store statistics
    Stats,

    /// Tail the daemon's event feed
    Events,
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon in the background
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Create a query scope
    Create {
        /// Viewer workspace name (defaults to the workspace config)
        #[arg(short, long)]
        viewer: Option<String>,

        /// Corpus names in scope (defaults to the workspace config's
        /// read scope, then "default")
        #[arg(short, long)]
        corpora: Vec<String>,

        /// Record note reads in the access log
        #[arg(short, long)]
        tracked: bool,
    },
    /// List recent queries
    Recent {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show one query
    Show { id: i64 },
}

#[derive(Subcommand)]
pub enum CorpusCommands {
    /// List corpora
    List,
    /// Create (or fetch) a corpus by name
    Create { name: String },
    /// Delete a corpus and all its notes
    Rm { id: i64 },
}

#[derive(Subcommand)]
pub enum WorkspaceCommands {
    /// List workspaces
    List,
    /// Create (or fetch) a workspace by name
    Create { name: String },
    /// Delete a workspace and its queries
    Rm { id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_defaults() {
        let cli = Cli::parse_from(["spall", "sync", "/tmp/notes"]);
        match cli.command {
            Commands::Sync { glob, corpus, prefix, .. } => {
                assert_eq!(glob, "**/*.md");
                assert_eq!(corpus, "default");
                assert!(prefix.is_none());
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn search_mode_parses() {
        let cli = Cli::parse_from(["spall", "search", "3", "jwt tokens", "--mode", "fts"]);
        match cli.command {
            Commands::Search { query, q, mode, .. } => {
                assert_eq!(query, 3);
                assert_eq!(q, "jwt tokens");
                assert_eq!(mode, "fts");
            }
            _ => panic!("expected search"),
        }
    }
}
