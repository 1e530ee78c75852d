use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "songbot")]
#[command(version = "0.1.0")]
#[command(about = "Chat bot that finds, downloads, tags and delivers songs")]
pub struct Cli {
    /// Directory holding persisted state, scratch downloads and error logs
    /// (overrides DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Env file read before the process environment
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub log_format: OutputFormat,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// Port for the liveness endpoint (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
