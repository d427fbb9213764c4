//! code-evolve CLI: scripted demonstration of the evolve loop.
//!
//! Runs the register -> prompt cycle against a scripted oracle: a fixed
//! table of priority-function variants with canned per-test scores stands
//! in for the code-generating model and the evaluation harness. Useful for
//! inspecting prompts, cluster growth, and the temperature schedule
//! without any external service.
//!
//! Options:
//!   --rounds=<N>               Number of prompt/register rounds (default: 8)
//!   --seed=<N>                 RNG seed for cluster sampling (default: 42)
//!   --functions-per-prompt=<N> Max sampled implementations per prompt (default: 2)
//!   --temperature-init=<F>     Initial sampling temperature (default: 1.0)
//!   --temperature-period=<N>   Anneal period in registrations (default: 10)
//!   --summary=<path>           JSON summary output (default: evolve_summary.json)
//!   --show-prompt              Print the final prompt text

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use code_evolve::{Function, Island, IslandConfig, Program};

/// CLI configuration parsed from command-line arguments.
struct CliConfig {
    rounds: usize,
    seed: u64,
    functions_per_prompt: usize,
    temperature_init: f64,
    temperature_period: u32,
    summary_path: String,
    show_prompt: bool,
}

/// End-of-run summary saved as JSON.
#[derive(Serialize)]
struct RunSummary {
    rounds: usize,
    seed: u64,
    num_programs: usize,
    num_clusters: usize,
    best_score: f64,
    final_temperature: f64,
    last_version_requested: usize,
}

/// Scripted oracle output: a variant body plus its per-test scores on the
/// three canned packing instances.
const SCRIPTED_VARIANTS: &[(&str, [f64; 3])] = &[
    ("    -(cap - item).abs()", [0.31, 0.28, 0.25]),
    ("    if item <= cap { cap - item } else { f64::MIN }", [0.44, 0.41, 0.39]),
    ("    if item <= cap { -(cap - item) } else { f64::MIN }", [0.58, 0.61, 0.55]),
    ("    if item <= cap { 1.0 / (cap - item + 0.1) } else { f64::MIN }", [0.63, 0.66, 0.60]),
    ("    if item <= cap { -(cap - item).powi(2) } else { f64::MIN }", [0.58, 0.61, 0.55]),
    ("    if item <= cap { (item / cap).ln() } else { f64::MIN }", [0.49, 0.52, 0.47]),
    ("    if item <= cap { item - cap * 0.5 } else { f64::MIN }", [0.36, 0.34, 0.30]),
];

fn parse_args() -> CliConfig {
    let args: Vec<String> = std::env::args().collect();

    let rounds = args
        .iter()
        .find(|a| a.starts_with("--rounds="))
        .and_then(|a| a.strip_prefix("--rounds=")?.parse::<usize>().ok())
        .unwrap_or(8);

    let seed = args
        .iter()
        .find(|a| a.starts_with("--seed="))
        .and_then(|a| a.strip_prefix("--seed=")?.parse::<u64>().ok())
        .unwrap_or(42);

    let functions_per_prompt = args
        .iter()
        .find(|a| a.starts_with("--functions-per-prompt="))
        .and_then(|a| a.strip_prefix("--functions-per-prompt=")?.parse::<usize>().ok())
        .unwrap_or(2);

    let temperature_init = args
        .iter()
        .find(|a| a.starts_with("--temperature-init="))
        .and_then(|a| a.strip_prefix("--temperature-init=")?.parse::<f64>().ok())
        .unwrap_or(1.0);

    let temperature_period = args
        .iter()
        .find(|a| a.starts_with("--temperature-period="))
        .and_then(|a| a.strip_prefix("--temperature-period=")?.parse::<u32>().ok())
        .unwrap_or(10);

    let summary_path = args
        .iter()
        .find(|a| a.starts_with("--summary="))
        .map(|a| a.strip_prefix("--summary=").unwrap().to_string())
        .unwrap_or_else(|| "evolve_summary.json".to_string());

    let show_prompt = args.iter().any(|a| a == "--show-prompt");

    CliConfig {
        rounds,
        seed,
        functions_per_prompt,
        temperature_init,
        temperature_period,
        summary_path,
        show_prompt,
    }
}

/// Build the demo template: an online bin-packing context whose `priority`
/// function is the evolution target.
fn demo_template() -> Program {
    Program {
        preface: "// Online bin packing: place each arriving item into the bin whose\n\
                  // remaining capacity the priority function scores highest."
            .to_string(),
        functions: vec![seed_variant()],
    }
}

/// The hand-written starting implementation, registered before round one.
fn seed_variant() -> Function {
    Function {
        name: "priority".to_string(),
        args: "item: f64, cap: f64".to_string(),
        return_type: Some("f64".to_string()),
        docstring: Some("Score placing `item` into a bin with remaining capacity `cap`.".to_string()),
        body: "    cap - item".to_string(),
    }
}

fn scores_for(per_test: &[f64; 3]) -> BTreeMap<String, f64> {
    let tests = ["weibull_u120", "weibull_u250", "weibull_u500"];
    tests
        .iter()
        .zip(per_test.iter())
        .map(|(name, score)| (name.to_string(), *score))
        .collect()
}

fn main() {
    env_logger::init();

    let config = parse_args();

    println!("========================================");
    println!("  code-evolve: prompt sampling demo");
    println!("========================================");
    println!();
    println!("  Rounds: {}", config.rounds);
    println!("  Seed: {}", config.seed);
    println!("  Functions per prompt: {}", config.functions_per_prompt);
    println!(
        "  Temperature: init {:.2}, period {}",
        config.temperature_init, config.temperature_period
    );
    println!();

    let island_config = IslandConfig {
        functions_per_prompt: config.functions_per_prompt,
        temperature_init: config.temperature_init,
        temperature_period: config.temperature_period,
    };

    let mut island = match Island::new(demo_template(), "priority", island_config) {
        Ok(island) => island,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut rng = StdRng::seed_from_u64(config.seed);

    // The seed implementation enters first, exactly as the outer loop would
    // register the hand-written starting point.
    island.register_program(seed_variant(), &scores_for(&[0.22, 0.20, 0.18]));

    println!(
        "  {:>5} | {:>7} | {:>8} | {:>8} | {:>11} | {:>10}",
        "Round", "Version", "Clusters", "Programs", "Temperature", "Best"
    );
    println!("  {}", "-".repeat(64));

    let mut last_version = 0;
    let mut last_prompt = String::new();

    for round in 0..config.rounds {
        let (prompt, version) = match island.get_prompt(&mut rng) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("Error building prompt in round {}: {}", round + 1, e);
                std::process::exit(1);
            }
        };
        last_version = version;
        last_prompt = prompt;

        // Scripted oracle: the next canned variant answers the prompt, and
        // its canned scores stand in for the evaluation harness.
        let (body, per_test) = &SCRIPTED_VARIANTS[round % SCRIPTED_VARIANTS.len()];
        let mut response = seed_variant();
        response.docstring = None;
        response.body = body.to_string();
        island.register_program(response, &scores_for(per_test));

        let best = island
            .scores()
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        println!(
            "  {:>5} | {:>7} | {:>8} | {:>8} | {:>11.3} | {:>10.3}",
            round + 1,
            version,
            island.num_clusters(),
            island.num_programs(),
            island.temperature(),
            best
        );
    }

    println!();
    if config.show_prompt {
        println!("--- Final prompt ---");
        println!("{}", last_prompt);
    }

    let best_score = island
        .scores()
        .into_iter()
        .fold(f64::NEG_INFINITY, f64::max);
    let summary = RunSummary {
        rounds: config.rounds,
        seed: config.seed,
        num_programs: island.num_programs(),
        num_clusters: island.num_clusters(),
        best_score,
        final_temperature: island.temperature(),
        last_version_requested: last_version,
    };
    save_json(&config.summary_path, &summary);

    println!("Summary saved: {}", config.summary_path);
    println!();
    println!("========================================");
    println!("  Done.");
    println!("========================================");
}

/// Save a serializable value as JSON.
fn save_json<T: Serialize>(path: &str, data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, &json) {
                eprintln!("  Warning: failed to write {}: {}", path, e);
            }
        }
        Err(e) => {
            eprintln!("  Warning: failed to serialize {}: {}", path, e);
        }
    }
}
