//! spall CLI: subcommands over the daemon's HTTP API.
//!
//! Every command either connects to the running daemon or spawns one
//! and connects (leader election through the lock file). Streaming
//! commands render scan/embed progress from the SSE feed.

pub mod cli;
pub mod client;
pub mod commands;
pub mod output;
