use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ordo_artifact::{Address, ArtifactStore};
use ordo_core::cache::{read_pending_transactions, AddressCache};
use ordo_core::config::env;
use ordo_core::prelude::*;
use ordo_core::{simulate, simulation_roles, InterruptGuard, Maintenance, Settings, StatePaths, UpgradeReport};
use ordo_ledger::{BuildDirRegistry, RpcLedger, SafeCustody};
use tracing_subscriber::EnvFilter;

const DEFAULT_BUILD_DIR: &str = "build/contracts";

fn cli() -> Command {
    Command::new("ordo")
        .version(ordo_core::VERSION)
        .about("Ordered, idempotent deployment and upgrade of on-chain component suites")
        .subcommand_required(true)
        .arg(
            Arg::new("network")
                .long("network")
                .short('n')
                .global(true)
                .env(env::NETWORK)
                .help("Network name; selects settings and the artifact suffix"),
        )
        .arg(
            Arg::new("state-dir")
                .long("state-dir")
                .global(true)
                .env(env::STATE_DIR)
                .value_parser(value_parser!(PathBuf))
                .help("Root of artifacts/, deploy-cache.json, upgrade-cache.json and transactions.json"),
        )
        .arg(
            Arg::new("settings")
                .long("settings")
                .global(true)
                .env("ORDO_SETTINGS")
                .default_value("ordo.toml")
                .value_parser(value_parser!(PathBuf))
                .help("Network settings file"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Abort on the first failed administrative call"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("deploy")
                .about("Deploy or attach every unit, then apply pending configuration stages")
                .arg(
                    Arg::new("no-proxy")
                        .long("no-proxy")
                        .action(ArgAction::SetTrue)
                        .help("Deploy core units directly instead of behind proxies"),
                )
                .arg(
                    Arg::new("testnet")
                        .long("testnet")
                        .action(ArgAction::SetTrue)
                        .help("Include the token and dispenser units"),
                )
                .arg(
                    Arg::new("with-token")
                        .long("with-token")
                        .action(ArgAction::SetTrue)
                        .help("Include the token outside the testnet profile"),
                )
                .arg(
                    Arg::new("attach-only")
                        .long("attach-only")
                        .action(ArgAction::SetTrue)
                        .help("Require core units to be cached already"),
                )
                .arg(
                    Arg::new("fresh")
                        .long("fresh")
                        .action(ArgAction::SetTrue)
                        .help("Ignore existing artifacts when seeding the cache"),
                )
                .arg(
                    Arg::new("fee-rate")
                        .long("fee-rate")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(i64))
                        .help("Marketplace fee rate, 0..=1000000"),
                )
                .arg(
                    Arg::new("fee-receiver")
                        .long("fee-receiver")
                        .value_parser(value_parser!(Address))
                        .help("Marketplace fee receiver"),
                )
                .arg(
                    Arg::new("forwarder")
                        .long("forwarder")
                        .value_parser(value_parser!(Address))
                        .help("Meta-transaction forwarder"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade proxied core units, falling back to the multisig")
                .arg(
                    Arg::new("fail-fast")
                        .long("fail-fast")
                        .action(ArgAction::SetTrue)
                        .help("Abort on the first failed direct upgrade"),
                ),
        )
        .subcommand(
            Command::new("upgrade-library")
                .about("Redeploy libraries and re-point their dependents")
                .arg(
                    Arg::new("with-aave")
                        .long("with-aave")
                        .action(ArgAction::SetTrue)
                        .help("Also redeploy the credit vault library"),
                ),
        )
        .subcommand(Command::new("deprecate").about("Revoke rights granted to condition units"))
        .subcommand(Command::new("status").about("Show cached addresses, stage cursor and artifacts"))
        .subcommand(
            Command::new("simulate")
                .about("Deploy and upgrade against the in-memory ledger")
                .arg(
                    Arg::new("no-proxy")
                        .long("no-proxy")
                        .action(ArgAction::SetTrue)
                        .help("Deploy core units directly instead of behind proxies"),
                )
                .arg(
                    Arg::new("testnet")
                        .long("testnet")
                        .action(ArgAction::SetTrue)
                        .help("Include the token and dispenser units"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Environment configuration with command-line overrides applied
fn deploy_config(global: &ArgMatches, sub: &ArgMatches) -> anyhow::Result<DeployConfig> {
    let mut config = DeployConfig::from_env().context("reading environment")?;
    let flag = |name: &str| sub.try_get_one::<bool>(name).ok().flatten().copied().unwrap_or(false);

    if let Some(network) = global.get_one::<String>("network") {
        config = config.with_network(network.clone());
    }
    if let Some(dir) = global.get_one::<PathBuf>("state-dir") {
        config = config.with_paths(StatePaths::under(dir));
    }
    if global.get_flag("strict") {
        config = config.with_strict(true);
    }
    if flag("no-proxy") {
        config = config.with_no_proxy(true);
    }
    if flag("testnet") {
        config = config.with_testnet(true);
    }
    if flag("with-token") {
        config.with_token = true;
    }
    if flag("attach-only") {
        config = config.with_deploy_core(false);
    }
    if flag("fresh") {
        config = config.with_fresh(true);
    }
    if flag("fail-fast") {
        config = config.with_fail_fast(true);
    }
    let rate = sub.try_get_one::<i64>("fee-rate").ok().flatten().copied();
    let receiver = sub.try_get_one::<Address>("fee-receiver").ok().flatten().copied();
    if rate.is_some() || receiver.is_some() {
        let rate = rate.unwrap_or(config.fee.rate);
        let receiver = receiver.unwrap_or(config.fee.receiver);
        config = config.with_fee(rate, receiver);
    }
    if let Some(forwarder) = sub.try_get_one::<Address>("forwarder").ok().flatten() {
        config = config.with_forwarder(Some(*forwarder));
    }

    config.validate()?;
    Ok(config)
}

/// Context against the network named in `config`, from the settings file
fn live_context(config: DeployConfig, settings_path: &Path) -> anyhow::Result<DeploymentContext> {
    let settings = Settings::load(settings_path)?;
    let network = settings.network(&config.network)?;
    tracing::info!("Using {} at {}", config.network, network.rpc_url);

    let ledger = Arc::new(
        RpcLedger::connect(&network.rpc_url)?
            .with_timeout(Duration::from_secs(network.confirmation_timeout_secs)),
    );
    let build_dir = network
        .build_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_DIR));
    let ctx = DeploymentContext::new(
        config,
        network.roles.clone(),
        ledger.clone(),
        Arc::new(BuildDirRegistry::new(build_dir)),
        Arc::new(SafeCustody::new(ledger)),
    )?;
    Ok(ctx)
}

fn print_upgrade(report: &UpgradeReport) {
    for outcome in &report.outcomes {
        println!("{:<32} {:?}", outcome.unit, outcome.state);
    }
    if !report.pending.is_empty() {
        println!("{} transaction(s) routed through the multisig", report.pending.len());
    }
}

fn status(config: &DeployConfig) -> anyhow::Result<()> {
    let paths = &config.paths;
    let cache = if paths.deploy_cache.exists() {
        AddressCache::load(&paths.deploy_cache)?
    } else {
        AddressCache::new()
    };
    let store = ArtifactStore::new(&paths.artifacts_dir, &config.network);

    println!("Network: {}", config.network);
    println!("Stage:   {}", cache.stage());
    println!("Ready:   {}", store.is_ready());
    println!();
    for (name, address) in cache.iter() {
        let artifact = store.path_for(name);
        let exported = std::fs::metadata(&artifact)
            .and_then(|m| m.modified())
            .map(|t| chrono::DateTime::<chrono::Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| "-".to_string());
        println!("{name:<32} {address} {exported}");
    }

    if paths.transactions.exists() {
        let pending = read_pending_transactions(&paths.transactions)?;
        println!();
        println!("Pending multisig transactions: {}", pending.len());
        for tx in &pending {
            println!("  {} {} {}", tx.to, tx.function, tx.description);
        }
    }
    Ok(())
}

async fn run(matches: ArgMatches) -> anyhow::Result<i32> {
    let settings = matches
        .get_one::<PathBuf>("settings")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("ordo.toml"));

    match matches.subcommand() {
        Some(("deploy", sub)) => {
            let config = deploy_config(&matches, sub)?;
            let ctx = live_context(config, &settings)?;
            let outcome = Orchestrator::new(ctx)
                .deploy_guarded(&DeploymentPlan::standard(), &standard_stages(), shutdown_signal())
                .await?;
            if let GuardOutcome::Completed(report) = &outcome {
                println!("Deployed {} units", report.book.len());
                println!("Stages applied: {:?}", report.stages.applied);
                if !report.stages.failed.is_empty() {
                    println!("Stages failed:  {:?}", report.stages.failed);
                }
            }
            Ok(outcome.exit_code())
        }
        Some(("upgrade", sub)) => {
            let config = deploy_config(&matches, sub)?;
            let ctx = live_context(config, &settings)?;
            let outcome = Orchestrator::new(ctx)
                .upgrade_guarded(&DeploymentPlan::standard(), shutdown_signal())
                .await?;
            if let GuardOutcome::Completed(report) = &outcome {
                print_upgrade(report);
            }
            Ok(outcome.exit_code())
        }
        Some(("upgrade-library", sub)) => {
            let config = deploy_config(&matches, sub)?;
            let ctx = live_context(config, &settings)?;
            let with_aave = sub.get_flag("with-aave");
            let outcome = InterruptGuard::new(ctx.addresses.clone())
                .run(Maintenance::new(&ctx).upgrade_library(with_aave), shutdown_signal())
                .await?;
            if let GuardOutcome::Completed(upgraded) = &outcome {
                for lib in upgraded {
                    println!("{} -> {} (used by {})", lib.library, lib.address, lib.dependent);
                }
            }
            Ok(outcome.exit_code())
        }
        Some(("deprecate", sub)) => {
            let config = deploy_config(&matches, sub)?;
            let ctx = live_context(config, &settings)?;
            let report = Maintenance::new(&ctx).deprecate().await?;
            println!(
                "Applied {}, skipped {}, failed {}",
                report.applied, report.skipped, report.failed
            );
            Ok(i32::from(report.failed > 0))
        }
        Some(("status", sub)) => {
            let config = deploy_config(&matches, sub)?;
            status(&config)?;
            Ok(0)
        }
        Some(("simulate", sub)) => {
            let config = deploy_config(&matches, sub)?;
            let report = simulate(config, simulation_roles()).await?;
            println!("Deployments:  {}", report.deployments);
            println!("Calls:        {} ({} failed)", report.calls, report.failed_calls);
            println!("Stages:       {:?}", report.deploy.stages.applied);
            print_upgrade(&report.upgrade);
            Ok(i32::from(!report.upgrade.failed().is_empty()))
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let code = match run(matches).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}
