//! CLI interface for the CCube worker
//!
//! This module provides the command-line interface using clap's derive API.
//! Every command runs one pipeline stage once and exits.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CCube pipeline worker
///
/// Runs one learn, filter or fuser stage of a job: it takes one task from
/// the job's queue, does the work and publishes the result downstream.
#[derive(Parser, Debug)]
#[command(name = "ccube-worker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Train one model from a learn task
    Learn {
        /// Job name, the prefix of the job's queues
        #[arg(short, long)]
        job: String,
    },

    /// Select the learned models worth fusing
    Filter {
        /// Job name, the prefix of the job's queues
        #[arg(short, long)]
        job: String,
    },

    /// Fuse the selected models and evaluate the ensemble
    Fuser {
        /// Job name, the prefix of the job's queues
        #[arg(short, long)]
        job: String,
    },
}

impl Command {
    pub fn job(&self) -> &str {
        match self {
            Command::Learn { job } | Command::Filter { job } | Command::Fuser { job } => job,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Command::Learn { .. } => "learn",
            Command::Filter { .. } => "filter",
            Command::Fuser { .. } => "fuser",
        }
    }
}
