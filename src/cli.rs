//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};

/// Mirror image-board search results to a local directory.
///
/// Each query gets its own directory holding downloaded images, optional tag
/// files, and a marker recording which query the directory belongs to.
/// Repeated runs only fetch what is new.
#[derive(Parser, Debug)]
#[command(name = "booru-sync")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download images matching a search query
    #[command(after_help = "Example: booru-sync download \"oc:hardy\" --save-tags")]
    Download(DownloadArgs),
    /// Print the currently featured image as JSON
    Featured,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Search query, e.g. "oc:hardy, safe"
    pub query: String,

    /// Base directory for sync directories (created if missing) [default: downloads/sync]
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Maximum number of images to process in one run [default: 300]
    #[arg(
        short = 'l',
        long = "limit",
        visible_alias = "fetch-limit",
        value_parser = RangedU64ValueParser::<usize>::new().range(1..),
        conflicts_with = "no_limit"
    )]
    pub limit: Option<usize>,

    /// Process every matching image regardless of how many there are
    #[arg(long)]
    pub no_limit: bool,

    /// Don't stop the search after detecting already downloaded images
    #[arg(long)]
    pub check_all: bool,

    /// Save image tags to a separate folder
    #[arg(long)]
    pub save_tags: bool,

    /// Start downloading with a specific page
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub start_page: u32,

    /// Results per search page (1-50)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=50))]
    pub per_page: Option<u32>,

    /// Server-side filter to apply (100073 default, 56027 everything)
    #[arg(long)]
    pub filter_id: Option<u64>,

    /// Image representation to download (full, large, medium, thumb, ...)
    #[arg(long)]
    pub representation: Option<String>,

    /// Maximum concurrent connections (1-50)
    #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..=50))]
    pub max_connections: Option<usize>,

    /// API root URL
    #[arg(long)]
    pub base_url: Option<String>,
}
