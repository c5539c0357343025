//! crcache - Compute Resource Cache
//!
//! Acquire, use and release compute resources from configured sources:
//! - `acquire` checks resources out of a source
//! - `run` executes a command on one of them
//! - `release` hands them back (cached or discarded)
//! - `status` shows what every source holds

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use crcache_core::{init_logging, Config, ExecMode, LocalStore, PoolRegistry};
use tracing::debug;

fn print_help() {
    println!("crcache - Compute resource cache v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  crcache acquire [-s SOURCE] [COUNT]   Obtain COUNT resources (default 1 from 'local')");
    println!("  crcache release [-f] RESOURCE...      Return resources; -f forces a real discard");
    println!("  crcache run RESOURCE [COMMAND...]     Run COMMAND (default: a shell) on RESOURCE");
    println!("  crcache status [SOURCE...]            Show cached / in-use / max per source");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help       Print this help message");
    println!("  -v, --version    Print version information");
    println!();
    println!("Sources are configured in ~/.config/crcache/sources/<name>/source.json");
    println!("or ./.crcache/sources/<name>/source.json. State is kept in ~/.cache/crcache.");
}

fn open_registry() -> Result<PoolRegistry> {
    let store = LocalStore::open_default().context("Failed to open the state store")?;
    Ok(PoolRegistry::new(Config::discover(), Arc::new(store)))
}

fn acquire(args: &[String]) -> Result<i32> {
    let mut source = "local".to_string();
    let mut count = 1usize;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-s" | "--source" => {
                source = iter.next().context("--source needs a value")?.clone();
            }
            value => {
                count = value
                    .parse()
                    .with_context(|| format!("'{value}' is not a resource count"))?;
            }
        }
    }

    let mut registry = open_registry()?;
    let pool = registry.get(&source)?;
    let resources = pool.provision(count)?;
    println!("{}", resources.into_iter().collect::<Vec<_>>().join(" "));
    Ok(0)
}

fn release(args: &[String]) -> Result<i32> {
    let force = args.iter().any(|arg| arg == "-f" || arg == "--force");
    let resources: Vec<String> = args
        .iter()
        .filter(|arg| *arg != "-f" && *arg != "--force")
        .cloned()
        .collect();
    if resources.is_empty() {
        bail!("release needs at least one resource");
    }
    open_registry()?.release(&resources, force)?;
    Ok(0)
}

fn run(args: &[String]) -> Result<i32> {
    let (resource, command) = args.split_first().context("run needs a resource")?;
    let command = match command.split_first() {
        Some((first, rest)) if first == "--" => rest,
        _ => command,
    };
    let (name, _) = resource
        .split_once('-')
        .with_context(|| format!("'{resource}' is not a resource id"))?;

    let mut registry = open_registry()?;
    let pool = registry.get(name)?;
    let mut child = pool.execute_on(resource, command, ExecMode::Inherit)?;
    let status = child.wait().context("Failed to wait for command")?;
    debug!(?status, "Command finished");
    Ok(status.code().unwrap_or(1))
}

fn status(args: &[String]) -> Result<i32> {
    let rows = open_registry()?.status_of(args)?;

    let width = rows
        .iter()
        .map(|row| row.name.len())
        .chain(std::iter::once("source".len()))
        .max()
        .unwrap_or(0);
    println!("{:<width$}  {:>6}  {:>6}  {:>4}", "source", "cached", "in-use", "max");
    for row in rows {
        println!(
            "{:<width$}  {:>6}  {:>6}  {:>4}",
            row.name, row.cached, row.in_use, row.maximum
        );
    }
    Ok(0)
}

fn dispatch(args: &[String]) -> Result<i32> {
    let Some((command, rest)) = args.split_first() else {
        print_help();
        return Ok(0);
    };
    match command.as_str() {
        "-h" | "--help" | "help" => {
            print_help();
            Ok(0)
        }
        "-v" | "--version" => {
            println!("crcache {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        "acquire" => acquire(rest),
        "release" => release(rest),
        "run" => run(rest),
        "status" => status(rest),
        other => bail!("unrecognized command '{other}'. Run 'crcache --help' for usage information."),
    }
}

fn main() {
    init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match dispatch(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
