use std::fs;
use std::process::ExitCode;

use clap::Parser;
use jiff::{SignedDuration, Timestamp};

use loopcast::catalog::{Catalog, load_channel};
use loopcast::config::get_config;
use loopcast::resolve::{resolve_current, resolve_next, resolve_window};

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
enum Command {
    /// What a channel is airing, and at what offset.
    Now {
        channel: String,
        /// Resolve at this RFC3339 instant instead of the current time.
        #[clap(long)]
        at: Option<Timestamp>,
    },
    /// Forward-looking guide for a channel.
    Guide {
        channel: String,
        #[clap(default_value = "3")]
        hours: i64,
    },
    /// Validate every channel document in the configured directory.
    Check,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = get_config();
    match args.cmd {
        Command::Now { channel, at } => {
            let catalog = load_catalog(&config.channels_dir);
            let Some(channel) = catalog.get(&channel) else {
                eprintln!("unknown channel '{channel}'");
                return ExitCode::FAILURE;
            };
            let now = at.unwrap_or_else(Timestamp::now);
            match resolve_current(&channel, now) {
                Some(r) => {
                    println!(
                        "{} @ {:.3}s (instance started {})",
                        r.entry.content_id,
                        r.offset.as_secs_f64(),
                        r.instance_start
                    );
                    if let Some(next) = resolve_next(&channel, now) {
                        println!("next: {}", next.content_id);
                    }
                }
                None => println!("off air"),
            }
            ExitCode::SUCCESS
        }
        Command::Guide { channel, hours } => {
            let catalog = load_catalog(&config.channels_dir);
            let Some(channel) = catalog.get(&channel) else {
                eprintln!("unknown channel '{channel}'");
                return ExitCode::FAILURE;
            };
            let start = Timestamp::now();
            let end = start + SignedDuration::from_secs(hours * 3600);
            for block in resolve_window(&channel, start, end) {
                println!(
                    "{}  {} -> {}  (+{:.0}s, {:.0}s visible)",
                    block.entry.content_id,
                    block.instance_start,
                    block.instance_end,
                    block.visible_left.as_secs_f64(),
                    block.visible_width.as_secs_f64()
                );
            }
            ExitCode::SUCCESS
        }
        Command::Check => {
            let mut failures = 0usize;
            let entries = match fs::read_dir(&config.channels_dir) {
                Ok(entries) => entries,
                Err(err) => {
                    eprintln!("cannot read '{}': {err}", config.channels_dir);
                    return ExitCode::FAILURE;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match load_channel(&path) {
                    Ok(channel) => println!(
                        "ok  {} ({} entries, loop {:.0}s)",
                        channel.id(),
                        channel.entries().len(),
                        channel.loop_duration().as_secs_f64()
                    ),
                    Err(err) => {
                        failures += 1;
                        eprintln!("bad {}: {err}", path.display());
                    }
                }
            }
            if failures > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    }
}

fn load_catalog(dir: &str) -> Catalog {
    match Catalog::from_dir(dir) {
        Ok(catalog) => catalog,
        Err(err) => {
            eprintln!("failed to load catalog from '{dir}': {err}");
            std::process::exit(1);
        }
    }
}
