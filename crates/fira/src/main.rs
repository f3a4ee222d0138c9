//! fira - FiRA UWB two-party ranging harness
//!
//! Runs the ranging scenarios against the in-process simulated radio field.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use fira_core::config::{HarnessConfig, LogFormat};
use fira_core::error::format_error_with_remediation;
use fira_core::logging::{LogConfig, init_logging};
use fira_core::params::{Channel, Profile, RangingParamsUpdate};
use fira_core::scenarios::{RangingPair, Scenario};
use serde::Serialize;

/// fira - FiRA UWB two-party ranging harness
#[derive(Parser, Debug)]
#[command(name = "fira")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a fira.toml configuration file
    #[arg(short, long, global = true, env = "FIRA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available scenarios
    #[command(alias = "ls")]
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run one scenario, or `all`
    Run {
        /// Scenario name (see `fira list`)
        scenario: String,

        /// Parameter profile (device_tracker, nearby_share)
        #[arg(long)]
        profile: Option<Profile>,

        /// UWB channel (5 or 9)
        #[arg(long)]
        channel: Option<u8>,

        /// Preamble code index (9..=12)
        #[arg(long)]
        preamble: Option<u8>,

        /// Emit a JSON summary on stdout
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    scenario: &'static str,
    passed: bool,
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List { json } => {
            list(json)?;
            Ok(true)
        }
        Commands::Config => {
            let text = config
                .to_toml_string()
                .context("failed to render configuration")?;
            print!("{text}");
            Ok(true)
        }
        Commands::Run {
            scenario,
            profile,
            channel,
            preamble,
            json,
        } => {
            let mut log = LogConfig::from(&config.general);
            if let Some(level) = cli.log_level {
                log.level = level;
            }
            if let Some(format) = cli.log_format {
                log.format = format;
            }
            init_logging(&log).context("failed to initialize logging")?;

            let scenarios = select(&scenario)?;
            let overrides = overrides(channel, preamble)?;
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            let summaries = runtime.block_on(run_scenarios(&config, &scenarios, profile, &overrides));
            report(&summaries, json)?;
            Ok(summaries.iter().all(|s| s.passed))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}

fn select(name: &str) -> Result<Vec<Scenario>> {
    if name.eq_ignore_ascii_case("all") {
        return Ok(Scenario::ALL.to_vec());
    }
    let scenario = name
        .parse::<Scenario>()
        .map_err(|e| anyhow!("{e} (run `fira list` for the available scenarios)"))?;
    Ok(vec![scenario])
}

fn overrides(channel: Option<u8>, preamble: Option<u8>) -> Result<RangingParamsUpdate> {
    let channel = channel
        .map(Channel::try_from)
        .transpose()
        .map_err(|e| anyhow!(e))?;
    Ok(RangingParamsUpdate {
        channel,
        preamble,
        ..RangingParamsUpdate::default()
    })
}

async fn run_scenarios(
    config: &HarnessConfig,
    scenarios: &[Scenario],
    profile: Option<Profile>,
    overrides: &RangingParamsUpdate,
) -> Vec<RunSummary> {
    let mut summaries = Vec::with_capacity(scenarios.len());
    for &scenario in scenarios {
        let mut pair = RangingPair::simulated(config).with_overrides(overrides.clone());
        if let Some(profile) = profile {
            pair = pair.with_profile(profile);
        }
        let start = tokio::time::Instant::now();
        let outcome = scenario.run(&mut pair).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        summaries.push(match outcome {
            Ok(_) => RunSummary {
                scenario: scenario.name(),
                passed: true,
                elapsed_ms,
                error: None,
            },
            Err(err) => RunSummary {
                scenario: scenario.name(),
                passed: false,
                elapsed_ms,
                error: Some(format_error_with_remediation(&err)),
            },
        });
    }
    summaries
}

fn report(summaries: &[RunSummary], json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(summaries).context("failed to encode summary")?;
        println!("{text}");
        return Ok(());
    }
    for summary in summaries {
        let status = if summary.passed { "PASS" } else { "FAIL" };
        println!(
            "{status:<5} {:<30} {:>8}ms",
            summary.scenario, summary.elapsed_ms
        );
        if let Some(error) = &summary.error {
            for line in error.lines() {
                println!("      {line}");
            }
        }
    }
    let passed = summaries.iter().filter(|s| s.passed).count();
    println!("{passed}/{} passed", summaries.len());
    Ok(())
}

fn list(json: bool) -> Result<()> {
    if json {
        let entries: Vec<_> = Scenario::ALL
            .iter()
            .map(|s| serde_json::json!({ "name": s.name(), "description": s.description() }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("failed to encode scenario list")?
        );
        return Ok(());
    }
    for scenario in Scenario::ALL {
        println!("{:<30} {}", scenario.name(), scenario.description());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn select_accepts_all_and_names() {
        assert_eq!(select("all").unwrap().len(), Scenario::ALL.len());
        assert_eq!(select("peer-reboot").unwrap(), vec![Scenario::PeerReboot]);
        assert!(select("nope").is_err());
    }

    #[test]
    fn overrides_reject_unknown_channel() {
        assert!(overrides(Some(7), None).is_err());
        let update = overrides(Some(5), Some(10)).unwrap();
        assert_eq!(update.channel, Some(Channel::Ch5));
        assert_eq!(update.preamble, Some(10));
    }
}
