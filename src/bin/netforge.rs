//! Command-line front end for generating permissioned BFT network artifacts.
//!
//! `generate` runs the full pipeline and writes the artifact tree,
//! `decode-extra` inspects an existing genesis `extraData` value and `guide`
//! prints the operator deployment steps for a configuration.

use netforge::{
    deployment_guide, extra_data, generate_network, write_network, ArtifactLayout,
    Balance, ConsensusAlgorithm, EndpointEntry, ExistingOutput, ForgeError, NetworkConfig,
};
use rand_core::OsRng;
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_OUT_DIR: &str = "besu-network";
const LOG_ENV: &str = "NETFORGE_LOG";

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_help() {
    println!("Usage: netforge <generate|decode-extra|guide> ...");
    println!("  generate [--config <file>] [--out <dir>] [--validators <N>] [--observers <N>]");
    println!("           [--chain-id <id>] [--consensus ibft2|qbft] [--block-period <secs>]");
    println!("           [--balance <0xhex|decimal>] [--hosts <host[:port]>,...] [--force]");
    println!("  decode-extra <0xhex> [--consensus ibft2|qbft]");
    println!("  guide [--config <file>] [--out <dir>] [overrides as for generate]");
}

fn main() {
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("generate") => {
            init_logging();
            cmd_generate(args.collect());
        }
        Some("decode-extra") => cmd_decode_extra(args.collect()),
        Some("guide") => cmd_guide(args.collect()),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            eprintln!("Usage: netforge <generate|decode-extra|guide> ...");
            std::process::exit(1);
        }
    }
}

/// Configuration plus output directory resolved from a config file and flags.
struct Invocation {
    config: NetworkConfig,
    out: PathBuf,
    force: bool,
}

fn parse_invocation(args: Vec<String>) -> Invocation {
    let mut config_path: Option<PathBuf> = None;
    let mut out: Option<PathBuf> = None;
    let mut validators: Option<usize> = None;
    let mut observers: Option<usize> = None;
    let mut chain_id: Option<u64> = None;
    let mut consensus: Option<ConsensusAlgorithm> = None;
    let mut block_period: Option<u64> = None;
    let mut balance: Option<String> = None;
    let mut hosts: Option<String> = None;
    let mut force = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--config expects a value")),
                ));
            }
            "--out" => {
                out = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--out expects a value")),
                ));
            }
            "--validators" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--validators expects a value"));
                validators = Some(
                    value
                        .parse()
                        .unwrap_or_else(|_| fatal("invalid --validators value")),
                );
            }
            "--observers" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--observers expects a value"));
                observers = Some(
                    value
                        .parse()
                        .unwrap_or_else(|_| fatal("invalid --observers value")),
                );
            }
            "--chain-id" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--chain-id expects a value"));
                chain_id = Some(
                    value
                        .parse()
                        .unwrap_or_else(|_| fatal("invalid --chain-id value")),
                );
            }
            "--consensus" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--consensus expects a value"));
                consensus = Some(value.parse().unwrap_or_else(|err: String| fatal(&err)));
            }
            "--block-period" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--block-period expects a value"));
                block_period = Some(
                    value
                        .parse()
                        .unwrap_or_else(|_| fatal("invalid --block-period value")),
                );
            }
            "--balance" => {
                balance = Some(
                    iter.next()
                        .unwrap_or_else(|| fatal("--balance expects a value")),
                );
            }
            "--hosts" => {
                hosts = Some(
                    iter.next()
                        .unwrap_or_else(|| fatal("--hosts expects a value")),
                );
            }
            "--force" => force = true,
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let mut config = match &config_path {
        Some(path) => NetworkConfig::load(path).unwrap_or_else(|err| fatal(&err.to_string())),
        None => NetworkConfig::default(),
    };
    if let Some(value) = validators {
        config.validators = value;
    }
    if let Some(value) = observers {
        config.observers = value;
    }
    if let Some(value) = chain_id {
        config.chain_id = value;
    }
    if let Some(value) = consensus {
        config.consensus = value;
    }
    if let Some(value) = block_period {
        config.block_period_seconds = value;
    }
    if let Some(value) = balance {
        config.initial_balance = value
            .parse::<Balance>()
            .unwrap_or_else(|err| fatal(&format!("invalid --balance: {err}")));
    }
    if let Some(value) = hosts {
        config.endpoints = parse_hosts(&value);
    }

    Invocation {
        config,
        out: out.unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
        force,
    }
}

fn parse_hosts(raw: &str) -> Vec<EndpointEntry> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            entry
                .parse::<EndpointEntry>()
                .unwrap_or_else(|err| fatal(&format!("invalid --hosts entry: {err}")))
        })
        .collect()
}

fn cmd_generate(args: Vec<String>) {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return;
    }
    let Invocation { config, out, force } = parse_invocation(args);
    let layout = ArtifactLayout::new(out);
    let existing = if force {
        ExistingOutput::Replace
    } else {
        ExistingOutput::Refuse
    };
    let artifacts = generate_network(&config, &layout, &mut OsRng)
        .unwrap_or_else(|err| fatal(&format!("generation failed: {err}")));
    let written = write_network(&layout, &artifacts, &config.service, existing)
        .unwrap_or_else(|err| match err {
            ForgeError::OutputExists { .. } => fatal(&format!("{err}; pass --force to replace it")),
            err => fatal(&format!("write failed: {err}")),
        });

    println!("Generated {} files under {}", written.len(), layout.root().display());
    for path in &written {
        println!("  {}", path.display());
    }
    println!();
    println!("Validators:");
    for identity in &artifacts.identities {
        println!("  node{}: {}", identity.index, identity.address);
    }
    if let Some(uri) = artifacts.topology.bootstrap_uri() {
        println!("Bootstrap: {uri}");
    }
    println!();
    print!("{}", deployment_guide(&config, &layout));
}

fn cmd_decode_extra(args: Vec<String>) {
    let mut input: Option<String> = None;
    let mut consensus = ConsensusAlgorithm::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--consensus" => {
                let value = iter
                    .next()
                    .unwrap_or_else(|| fatal("--consensus expects a value"));
                consensus = value.parse().unwrap_or_else(|err: String| fatal(&err));
            }
            other if input.is_none() && !other.starts_with("--") => {
                input = Some(other.to_string());
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let input = input
        .unwrap_or_else(|| fatal("Usage: netforge decode-extra <0xhex> [--consensus ibft2|qbft]"));
    let bytes = extra_data::from_hex(&input).unwrap_or_else(|err| fatal(&err.to_string()));
    let decoded =
        extra_data::decode(consensus, &bytes).unwrap_or_else(|err| fatal(&err.to_string()));
    println!("consensus: {consensus}");
    println!("round: {}", decoded.round);
    println!("validators: {}", decoded.validators.len());
    for (position, address) in decoded.validators.iter().enumerate() {
        println!("  {}: {address}", position + 1);
    }
}

fn cmd_guide(args: Vec<String>) {
    let Invocation { config, out, .. } = parse_invocation(args);
    let layout = ArtifactLayout::new(out);
    print!("{}", deployment_guide(&config, &layout));
}
