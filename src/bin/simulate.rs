use std::sync::Arc;

use seqassign::constants::DEFAULT_POLICY_PATH;
use seqassign::simulation::{save_summary, simulate_batch};
use seqassign::storage::load_policy;
use seqassign::ValueMatrix;

struct Args {
    policy: String,
    values: String,
    num_episodes: usize,
    seed: u64,
    output: Option<String>,
}

const USAGE: &str = "Usage: seqassign-simulate --values PATH [--policy PATH] [--episodes N] [--seed S] [--output FILE]";

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut policy = DEFAULT_POLICY_PATH.to_string();
    let mut values: Option<String> = None;
    let mut num_episodes = 10_000usize;
    let mut seed = 42u64;
    let mut output: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--policy" => {
                i += 1;
                if i < args.len() {
                    policy = args[i].clone();
                }
            }
            "--values" => {
                i += 1;
                if i < args.len() {
                    values = Some(args[i].clone());
                }
            }
            "--episodes" => {
                i += 1;
                if i < args.len() {
                    num_episodes = args[i].parse().unwrap_or_else(|_| {
                        eprintln!("Invalid --episodes value: {}", args[i]);
                        std::process::exit(1);
                    });
                }
            }
            "--seed" => {
                i += 1;
                if i < args.len() {
                    seed = args[i].parse().unwrap_or_else(|_| {
                        eprintln!("Invalid --seed value: {}", args[i]);
                        std::process::exit(1);
                    });
                }
            }
            "--output" => {
                i += 1;
                if i < args.len() {
                    output = Some(args[i].clone());
                }
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                println!();
                println!("Options:");
                println!("  --values PATH    JSON value matrix, rows = item types, cols = slots");
                println!(
                    "  --policy PATH    Policy artifact (default: {})",
                    DEFAULT_POLICY_PATH
                );
                println!("  --episodes N     Number of episodes (default: 10000)");
                println!("  --seed S         RNG seed (default: 42)");
                println!("  --output FILE    Write summary JSON to FILE");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("{}", USAGE);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let values = values.unwrap_or_else(|| {
        eprintln!("Error: --values is required");
        eprintln!("{}", USAGE);
        std::process::exit(1);
    });

    Args {
        policy,
        values,
        num_episodes,
        seed,
        output,
    }
}

fn load_values(path: &str) -> seqassign::Result<ValueMatrix> {
    let text = std::fs::read_to_string(path)?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&text)?;
    ValueMatrix::from_rows(rows)
}

fn main() {
    seqassign::env_config::init_logging();
    let _base = seqassign::env_config::init_base_path();
    let args = parse_args();
    let num_threads = seqassign::env_config::init_rayon_threads();

    let policy = match load_policy(&args.policy) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("Failed to load policy {}: {}", args.policy, e);
            std::process::exit(1);
        }
    };
    let values = match load_values(&args.values) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Failed to load values {}: {}", args.values, e);
            std::process::exit(1);
        }
    };

    println!(
        "Simulating {} episodes ({} slots, {} item types, {} threads)...",
        args.num_episodes,
        policy.slot_count(),
        values.rows(),
        num_threads
    );

    let result = match simulate_batch(&policy, &values, args.num_episodes, args.seed) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            std::process::exit(1);
        }
    };
    let s = &result.summary;

    println!();
    println!("  Online mean:    {:.3} (std {:.3})", s.mean, s.std_dev);
    println!(
        "  Online range:   {:.1} .. {:.1} (median {:.1})",
        s.min, s.max, s.median
    );
    println!("  Offline mean:   {:.3}", s.mean_optimal);
    println!("  Mean regret:    {:.3}", s.mean_regret);
    println!("  Efficiency:     {:.2}%", s.efficiency * 100.0);
    println!("  Fallbacks:      {}", s.fallbacks);
    println!(
        "  Time:           {:.2}s ({:.0} episodes/s)",
        result.elapsed.as_secs_f64(),
        args.num_episodes as f64 / result.elapsed.as_secs_f64().max(1e-9)
    );

    if let Some(path) = args.output {
        if let Err(e) = save_summary(s, &path) {
            eprintln!("Failed to write {}: {}", path, e);
            std::process::exit(1);
        }
        println!("Summary written to {}", path);
    }
}
