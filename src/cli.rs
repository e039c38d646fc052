use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "jsapi",
    version,
    about = "Locate JavaScript library methods in their source",
    after_help = r#"Examples:
  jsapi libraries --registry libs.json
  jsapi find --lib jquery --version 1.6.4 --method fn.data --expand 3
  jsapi list --lib underscore
  jsapi find --lib lib --version 1.0 --method add --source ./lib.js
  jsapi request --method resolve_path --params '{"path":"/jquery/1.6.4/ajax?expand=2"}'
  jsapi serve --registry libs.yaml
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Options every subcommand shares.
#[derive(ClapArgs, Debug, Clone)]
pub struct Common {
    /// Library registry (JSON, or YAML by extension).
    #[arg(long, default_value = "libs.json")]
    pub registry: PathBuf,
    /// Override JSAPI_CACHE_DIR.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Target {
    #[arg(long)]
    pub lib: String,
    #[arg(long, default_value = "default")]
    pub version: String,
    /// Ignore the cached copy and fetch again.
    #[arg(long)]
    pub refresh: bool,
    /// Read the library from this file instead of the network.
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,
    /// Companion script for `--source`; fetched through the cache when omitted.
    #[arg(long, value_name = "PATH", requires = "source")]
    pub companion: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Locate one method and print its annotated source.
    Find {
        #[command(flatten)]
        common: Common,
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        method: String,
        /// Context lines on each side of the function.
        #[arg(long, default_value_t = 0)]
        expand: u32,
        /// Print plain source without link markers.
        #[arg(long)]
        plain: bool,
    },
    /// List the methods of every configured namespace.
    List {
        #[command(flatten)]
        common: Common,
        #[command(flatten)]
        target: Target,
    },
    /// Run a single JSONL request and exit.
    Request {
        #[command(flatten)]
        common: Common,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[command(flatten)]
        common: Common,
    },
    /// Print the libraries the registry knows about.
    Libraries {
        #[command(flatten)]
        common: Common,
    },
}
