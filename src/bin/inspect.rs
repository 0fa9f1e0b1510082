use seqassign::constants::{DEFAULT_POLICY_PATH, NO_SLOT};
use seqassign::storage::{load_policy, save_policy};

fn main() {
    seqassign::env_config::init_logging();
    let _base = seqassign::env_config::init_base_path();

    let args: Vec<String> = std::env::args().collect();
    let mut policy_path = DEFAULT_POLICY_PATH.to_string();
    let mut convert: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--policy" => {
                i += 1;
                if i < args.len() {
                    policy_path = args[i].clone();
                }
            }
            "--convert" => {
                i += 1;
                if i < args.len() {
                    convert = Some(args[i].clone());
                }
            }
            "--help" | "-h" => {
                println!("Usage: seqassign-inspect [--policy PATH] [--convert OUT]");
                println!();
                println!("  --policy PATH   Policy artifact (default: {})", DEFAULT_POLICY_PATH);
                println!("  --convert OUT   Write the policy in the native memory-mappable format");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let policy = match load_policy(&policy_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to load policy {}: {}", policy_path, e);
            std::process::exit(1);
        }
    };

    println!("Policy {}", policy_path);
    println!("  Slots:       {}", policy.slot_count());
    println!("  Item types:  {}", policy.type_count());
    println!("  Rows:        {}", policy.row_count());
    println!("  Entries:     {}", policy.entries().len());

    let bad: Vec<_> = policy.inconsistent_entries().collect();
    if bad.is_empty() {
        println!("  Consistency: OK (every entry names a free slot)");
    } else {
        println!(
            "  Consistency: {} entries recommend an occupied or missing slot (runtime falls back)",
            bad.len()
        );
        for &(mask, t, slot) in bad.iter().take(10) {
            if slot == NO_SLOT as usize {
                println!("    mask {:#b} type {} -> no slot", mask, t);
            } else {
                println!("    mask {:#b} type {} -> slot {}", mask, t, slot);
            }
        }
    }

    if let Some(out) = convert {
        if let Err(e) = save_policy(&policy, &out) {
            eprintln!("Failed to write {}: {}", out, e);
            std::process::exit(1);
        }
        println!("Wrote native policy to {}", out);
    }
}
