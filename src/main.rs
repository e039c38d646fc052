use anyhow::Result;
use clap::Parser;
use jsapi::cli::{self, Common, Target};
use jsapi::config::Config;
use jsapi::linkify;
use jsapi::loader::{self, CachedLoader, HttpFetch, Loader, StaticLoader};
use jsapi::pipeline::{Pipeline, Settings};
use jsapi::registry::Registry;
use jsapi::request::{self, ResolutionRequest};
use jsapi::sandbox::quickjs::QuickJsFactory;
use jsapi::{rpc, util};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type Cli = Pipeline<Box<dyn Loader>, QuickJsFactory>;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jsapi=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn network_loader(common: &Common, config: &Config) -> Box<dyn Loader> {
    let cache_dir = common
        .cache_dir
        .clone()
        .unwrap_or_else(|| config.cache_dir.clone());
    let fetch = HttpFetch::new(Duration::from_secs(config.fetch_timeout_secs));
    Box::new(CachedLoader::new(cache_dir, fetch))
}

/// Library text from a local file. A companion script comes from
/// `--companion` when given, otherwise through the usual cached fetch.
fn offline_loader(
    common: &Common,
    config: &Config,
    registry: &Registry,
    settings: &Settings,
    target: &Target,
    path: &Path,
) -> Result<StaticLoader> {
    let request = ResolutionRequest::new(target.lib.as_str(), target.version.as_str());
    let valid = request::validate(&request, registry, settings.max_expand)?;
    let mut local = StaticLoader::new().with(valid.cache_key(), util::read_to_string(path)?);
    if let Some(url) = valid.descriptor.companion_url(&valid.version) {
        local = match &target.companion {
            Some(companion) => {
                local.with(loader::companion_key(url), util::read_to_string(companion)?)
            }
            None => local.with_fallback(Arc::from(network_loader(common, config))),
        };
    }
    Ok(local)
}

fn build(common: &Common, target: Option<&Target>) -> Result<Cli> {
    let config = Config::get();
    let registry = Arc::new(Registry::load(&common.registry)?);
    let settings = Settings::from_config(config);

    let loader: Box<dyn Loader> = match target.and_then(|t| t.source.as_ref().map(|s| (t, s))) {
        Some((target, path)) => Box::new(offline_loader(
            common, config, &registry, &settings, target, path,
        )?),
        None => network_loader(common, config),
    };

    Ok(Pipeline::new(
        registry,
        loader,
        QuickJsFactory::new(settings.timeout, config.memory_limit_mb),
        settings,
    ))
}

fn main() -> Result<()> {
    init_tracing();
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Find {
            common,
            target,
            method,
            expand,
            plain,
        } => {
            let pipeline = build(&common, Some(&target))?;
            let request = ResolutionRequest::new(target.lib, target.version)
                .with_method(method)
                .with_expand(expand)
                .with_refresh(target.refresh);
            let mut data = pipeline.find_single_method(&request)?;
            if plain {
                data.source = linkify::strip_markers(&data.source);
            }
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        cli::Command::List { common, target } => {
            let pipeline = build(&common, Some(&target))?;
            let request =
                ResolutionRequest::new(target.lib, target.version).with_refresh(target.refresh);
            let list = pipeline.find_all_methods(&request)?;
            println!("{}", serde_json::to_string_pretty(&list)?);
            Ok(())
        }
        cli::Command::Request {
            common,
            method,
            params,
            params_file,
            id,
        } => {
            let pipeline = build(&common, None)?;
            let params_raw = if let Some(path) = params_file {
                util::read_to_string(&path)?
            } else {
                params
            };
            let response = rpc::call(&pipeline, method, &params_raw, &id)?;
            println!("{response}");
            Ok(())
        }
        cli::Command::Serve { common } => {
            let pipeline = build(&common, None)?;
            rpc::serve(&pipeline)
        }
        cli::Command::Libraries { common } => {
            let pipeline = build(&common, None)?;
            let result = rpc::handle_method(&pipeline, "list_libraries", json!({}))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
