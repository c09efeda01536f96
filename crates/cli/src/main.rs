//! Tally CLI: inspect coverage registries and run a collector.
//!
//! - `tally header PATH`: fixed header fields
//! - `tally inspect PATH [--files] [--contexts]`: sessions, packages, coverage
//! - `tally collect [--config FILE] [--set PAIRS] [--duration SECS] [--registry PATH]`:
//!   accept remote recorders, then merge their hits into a registry

mod commands;
mod format;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::ArgMatches;
use tally_durability::{CoverageData, RegistryError, RegistryFile};
use tally_recorder::{
    ConfigError, DistributedConfig, RecorderError, RecorderService, SliceCollector,
    TcpRecorderService,
};
use thiserror::Error;
use tracing::info;

use commands::build_cli;
use format::{format_contents, format_header, format_summaries};

/// Anything a subcommand can fail with.
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Usage(String),
}

fn main() {
    let matches = build_cli().get_matches();
    let default_filter = if matches.get_flag("verbose") {
        "tally=debug"
    } else {
        "tally=info"
    };
    tally::logging::init(default_filter);

    let result = match matches.subcommand() {
        Some(("header", m)) => run_header(m),
        Some(("inspect", m)) => run_inspect(m),
        Some(("collect", m)) => run_collect(m),
        Some((other, _)) => Err(CliError::Usage(format!("unknown command '{}'", other))),
        None => Err(CliError::Usage("no command given".to_string())),
    };

    match result {
        Ok(output) => print!("{}", output),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn registry_path(m: &ArgMatches) -> Result<&PathBuf, CliError> {
    m.get_one::<PathBuf>("registry")
        .ok_or_else(|| CliError::Usage("registry path required".to_string()))
}

fn run_header(m: &ArgMatches) -> Result<String, CliError> {
    let registry = RegistryFile::open(registry_path(m)?)?;
    Ok(format_header(registry.header()))
}

fn run_inspect(m: &ArgMatches) -> Result<String, CliError> {
    let registry = RegistryFile::open(registry_path(m)?)?;
    let contents = registry.read_contents()?;
    Ok(format_contents(
        &contents,
        m.get_flag("files"),
        m.get_flag("contexts"),
    ))
}

fn collect_config(m: &ArgMatches) -> Result<DistributedConfig, CliError> {
    let mut config = match m.get_one::<PathBuf>("config") {
        Some(path) => DistributedConfig::from_file(path)?,
        None => DistributedConfig::default(),
    };
    config.apply_env()?;
    if let Some(pairs) = m.get_one::<String>("set") {
        config.apply_pairs(pairs)?;
    }
    config.enabled = true;
    config.validate()?;
    Ok(config)
}

fn run_collect(m: &ArgMatches) -> Result<String, CliError> {
    let config = collect_config(m)?;
    let seconds = m.get_one::<u64>("duration").copied().unwrap_or(60);

    // Fail before accepting anyone if the registry cannot take the hits.
    let mut registry = match m.get_one::<PathBuf>("registry") {
        Some(path) => Some(RegistryFile::open(path)?),
        None => None,
    };

    // Hits past the registry's slot table are dropped as they arrive.
    let mut collector = SliceCollector::new();
    if let Some(slots) = registry
        .as_ref()
        .map(|r| r.header().slot_count)
        .filter(|slots| *slots > 0)
    {
        collector = collector.with_max_slots(slots);
    }
    let mut service = TcpRecorderService::new().with_collector(Arc::new(collector));
    service.init(config)?;
    service.start()?;
    if let Some(addr) = service.local_addr() {
        eprintln!("collecting on {} for {}s", addr, seconds);
    }
    thread::sleep(Duration::from_secs(seconds));
    service.stop();

    let collector = service.collector();
    if let Some(registry) = registry.as_mut() {
        let contents = registry.read_contents()?;
        let mut coverage = contents
            .coverage
            .unwrap_or_else(|| CoverageData::with_slots(contents.header.slot_count));
        let tests = collector.merge_into(&mut coverage);
        registry.write_coverage(&coverage)?;
        info!(
            target: "tally::cli",
            path = %registry.path().display(),
            covered = coverage.covered_slots(),
            tests,
            "merged collected hits"
        );
    }
    Ok(format_summaries(&collector.summaries()))
}
