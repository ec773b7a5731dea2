//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Archive web pages into a local project.
///
/// Every fetch is kept as a revision; groups collect resources whose URLs
/// match a pattern.
#[derive(Parser, Debug)]
#[command(name = "archiver")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Maximum concurrent fetches (1-64)
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub concurrency: Option<u8>,

    /// Project directory (created if missing or empty)
    pub project: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Add a root resource
    Add {
        url: String,
        /// Display name (defaults to the URL)
        #[arg(long)]
        name: Option<String>,
    },
    /// Create a resource group
    Group {
        name: String,
        /// URL pattern: `*` within a segment, `**` anything, `#` digits, `@` letters
        pattern: String,
        /// Root resource (by name) whose download reveals the members
        #[arg(long, conflicts_with = "source_group")]
        source_root: Option<String>,
        /// Group (by name) whose download reveals the members
        #[arg(long)]
        source_group: Option<String>,
    },
    /// Download a URL and the resources it embeds
    Download {
        url: String,
        /// Also wait for embedded resources before reporting
        #[arg(long)]
        wait_embedded: bool,
    },
    /// Download every member of a group
    DownloadGroup { name: String },
    /// Download a group's source to discover new members
    UpdateGroup { name: String },
    /// List project entities
    List {
        #[arg(value_enum)]
        what: ListTarget,
    },
    /// List the revisions of a URL, newest first
    Revisions { url: String },
    /// Change a resource's URL
    Rename { old_url: String, new_url: String },
    /// Delete a resource and its revisions
    Delete { url: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    Resources,
    Roots,
    Groups,
}
