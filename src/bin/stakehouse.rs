//! Command-line front end for the stakehouse economics engines.
//!
//! Replays delegation scenarios, inspects checkpoints, and scores validator
//! snapshots.

use stakehouse::commands::score_snapshot;
use stakehouse::commands::simulate::{run_simulation, Scenario, SimulationDirs};
use stakehouse::{load_latest_checkpoint, Config};
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: stakehouse <simulate|checkpoint|score> ...");
    println!(
        "  simulate <scenario.json> [--config <config.json>] [--checkpoint-dir <dir>] \
         [--ledger-dir <dir>]"
    );
    println!("  checkpoint show <dir>");
    println!("  score <snapshot.json> [--config <config.json>]");
}

fn print_checkpoint_help() {
    println!("Usage: stakehouse checkpoint <show> ...");
    println!("  show <dir>");
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("simulate") => cmd_simulate(args.collect()),
        Some("checkpoint") => {
            let sub = args.next().unwrap_or_else(|| {
                print_checkpoint_help();
                std::process::exit(1);
            });
            handle_checkpoint(&sub, args.collect());
        }
        Some("score") => cmd_score(args.collect()),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            print_help();
            std::process::exit(1);
        }
    }
}

fn handle_checkpoint(sub: &str, tail: Vec<String>) {
    match sub {
        "-h" | "--help" => print_checkpoint_help(),
        "show" => cmd_checkpoint_show(tail),
        _ => fatal(&format!("Unknown checkpoint subcommand: {sub}")),
    }
}

struct CommonArgs {
    input: PathBuf,
    config: Config,
    checkpoint_dir: Option<PathBuf>,
    ledger_dir: Option<PathBuf>,
}

fn parse_common(tail: Vec<String>, usage: &str, allow_output_dirs: bool) -> CommonArgs {
    let mut input = None;
    let mut config_path = None;
    let mut checkpoint_dir = None;
    let mut ledger_dir = None;
    let mut iter = tail.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(
                    iter.next().unwrap_or_else(|| fatal("--config requires a path")),
                ));
            }
            "--checkpoint-dir" if allow_output_dirs => {
                checkpoint_dir = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--checkpoint-dir requires a path")),
                ));
            }
            "--ledger-dir" if allow_output_dirs => {
                ledger_dir = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--ledger-dir requires a path")),
                ));
            }
            other if other.starts_with("--") => fatal(&format!("Unknown flag: {other}")),
            other if input.is_none() => input = Some(PathBuf::from(other)),
            _ => fatal(usage),
        }
    }
    let input = input.unwrap_or_else(|| fatal(usage));
    let config = match config_path {
        Some(path) => Config::load(&path).unwrap_or_else(|err| fatal(&err.to_string())),
        None => Config::default(),
    };
    let checkpoint_dir = checkpoint_dir.or_else(|| config.checkpoint_dir.clone());
    let ledger_dir = ledger_dir.or_else(|| config.ledger_dir.clone());
    CommonArgs {
        input,
        config,
        checkpoint_dir,
        ledger_dir,
    }
}

fn cmd_simulate(tail: Vec<String>) {
    let args = parse_common(
        tail,
        "Usage: stakehouse simulate <scenario.json> [--config <file>] [--checkpoint-dir <dir>] \
         [--ledger-dir <dir>]",
        true,
    );
    init_tracing(&args.config.log_level);
    let scenario = Scenario::load(&args.input).unwrap_or_else(|err| fatal(&err.to_string()));
    let dirs = SimulationDirs {
        checkpoints: args.checkpoint_dir.as_deref(),
        ledgers: args.ledger_dir.as_deref(),
    };
    let summaries = run_simulation(&scenario, args.config.netparams(), dirs)
        .unwrap_or_else(|err| fatal(&err.to_string()));
    for summary in summaries {
        match serde_json::to_string(&summary) {
            Ok(line) => println!("{line}"),
            Err(err) => fatal(&format!("failed to encode summary: {err}")),
        }
    }
}

fn cmd_checkpoint_show(tail: Vec<String>) {
    if tail.len() != 1 {
        fatal("Usage: stakehouse checkpoint show <dir>");
    }
    let dir = PathBuf::from(&tail[0]);
    match load_latest_checkpoint(&dir) {
        Ok(Some(checkpoint)) => match serde_json::to_string_pretty(&checkpoint) {
            Ok(json) => println!("{json}"),
            Err(err) => fatal(&format!("failed to encode checkpoint: {err}")),
        },
        Ok(None) => fatal(&format!("no checkpoint found in {}", dir.display())),
        Err(err) => fatal(&err.to_string()),
    }
}

fn cmd_score(tail: Vec<String>) {
    let args = parse_common(
        tail,
        "Usage: stakehouse score <snapshot.json> [--config <file>]",
        false,
    );
    init_tracing(&args.config.log_level);
    let scores = score_snapshot(&args.input, &args.config.netparams())
        .unwrap_or_else(|err| fatal(&err.to_string()));
    match serde_json::to_string_pretty(&scores) {
        Ok(json) => println!("{json}"),
        Err(err) => fatal(&format!("failed to encode scores: {err}")),
    }
}
