use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the blockcache binary.
#[derive(Debug, Parser)]
#[command(name = "blockcache", version, about = "Block output cache tooling")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BLOCKCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the current generation stamp, creating one if none is stored.
    Stamp,
    /// Invalidate every cached block by rotating the generation stamp.
    ///
    /// Processes already running adopt the new stamp when they refresh it.
    Flush(FlushArgs),
    /// Render a sample page twice against one store to show capture and replay.
    Render(RenderArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct FlushArgs {
    /// Name recorded as the actor of the flush.
    #[arg(long = "actor", default_value = "cli", value_name = "NAME")]
    pub actor: String,
}

#[derive(Debug, Args, Clone, Default)]
pub struct RenderArgs {
    /// Render as this signed-in account instead of an anonymous viewer.
    #[arg(long = "account", value_name = "ID")]
    pub account: Option<u64>,

    /// Query variables as NAME=VALUE pairs.
    #[arg(long = "query", value_name = "NAME=VALUE", value_parser = parse_query_pair)]
    pub query: Vec<(String, String)>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Toggle block caching altogether.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the default block expiry.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS", global = true)]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Toggle HTML comments around replayed blocks.
    #[arg(
        long = "cache-debug-markers",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_debug_markers: Option<bool>,

    /// Override the file holding the persisted generation stamp.
    #[arg(
        long = "cache-state-file",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub cache_state_file: Option<PathBuf>,
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("query variable name is empty in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}
