use std::sync::Arc;

use seqassign::constants::DEFAULT_POLICY_PATH;
use seqassign::episode::Episode;
use seqassign::storage::load_policy;
use seqassign::{SequentialAssigner, ValueMatrix};

struct Args {
    policy: String,
    names: Option<Vec<String>>,
    values: Option<String>,
    stream: Vec<usize>,
}

const USAGE: &str =
    "Usage: seqassign-assign [--policy PATH] [--names A,B,...] [--values PATH] TYPE [TYPE ...]";

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut policy = DEFAULT_POLICY_PATH.to_string();
    let mut names: Option<Vec<String>> = None;
    let mut values: Option<String> = None;
    let mut stream = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--policy" => {
                i += 1;
                if i < args.len() {
                    policy = args[i].clone();
                }
            }
            "--names" => {
                i += 1;
                if i < args.len() {
                    names = Some(args[i].split(',').map(|s| s.trim().to_string()).collect());
                }
            }
            "--values" => {
                i += 1;
                if i < args.len() {
                    values = Some(args[i].clone());
                }
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                println!();
                println!("Options:");
                println!(
                    "  --policy PATH   Policy artifact (.npy, .json or native; default: {})",
                    DEFAULT_POLICY_PATH
                );
                println!("  --names A,B     Slot labels, one per slot");
                println!("  --values PATH   JSON value matrix (rows = types); tracks the total");
                println!("  TYPE ...        Arriving item types, in order");
                std::process::exit(0);
            }
            other => match other.parse::<usize>() {
                Ok(t) => stream.push(t),
                Err(_) => {
                    eprintln!("Unknown argument: {}", other);
                    eprintln!("{}", USAGE);
                    std::process::exit(1);
                }
            },
        }
        i += 1;
    }

    Args {
        policy,
        names,
        values,
        stream,
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

    let policy = match load_policy(&args.policy) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("Failed to load policy {}: {}", args.policy, e);
            std::process::exit(1);
        }
    };
    println!(
        "Policy: {} slots x {} types",
        policy.slot_count(),
        policy.type_count()
    );

    let assigner = match SequentialAssigner::new(policy, args.names) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match args.values {
        Some(path) => {
            let values = match load_values(&path) {
                Ok(v) => Arc::new(v),
                Err(e) => {
                    eprintln!("Failed to load values {}: {}", path, e);
                    std::process::exit(1);
                }
            };
            run_episode(Episode::new(assigner, values), &args.stream);
        }
        None => run_stream(assigner, &args.stream),
    }
}

fn run_stream(mut assigner: SequentialAssigner, stream: &[usize]) {
    for &t in stream {
        if assigner.is_finished() {
            println!("All slots used; ignoring remaining arrivals.");
            break;
        }
        match assigner.assign_next(t) {
            Ok(a) => println!(
                "type {:>4} -> {}{} | free: {:?}",
                t,
                a,
                if a.fallback { " (fallback)" } else { "" },
                assigner.categories_left()
            ),
            Err(e) => eprintln!("type {:>4}: {}", t, e),
        }
    }
}

fn run_episode(mut episode: Episode, stream: &[usize]) {
    for &t in stream {
        if episode.is_finished() {
            println!("All slots used; ignoring remaining arrivals.");
            break;
        }
        match episode.pick(t) {
            Ok(p) => println!(
                "item {:>4} -> {} | value {:.1}{}",
                t,
                p.label,
                p.value,
                if p.fallback { " (fallback)" } else { "" }
            ),
            Err(e) => eprintln!("item {:>4}: {}", t, e),
        }
    }
    println!();
    println!("Total: {:.1}", episode.total());
    println!("Free slots: {:?}", episode.categories_left());
    if episode.is_finished() {
        println!("Episode finished.");
    } else {
        println!("Top suggestions for the next arrival:");
        for s in episode.suggestions(5) {
            let label = episode
                .assigner()
                .pretty(s.slot)
                .unwrap_or_else(|_| s.slot.to_string());
            println!("  item {:>4} -> {} ({:.1})", s.item, label, s.value);
        }
    }
}
