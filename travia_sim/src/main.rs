//! Travia Trajectory Simulator CLI
//!
//! Run the smoother against synthetic scenarios with known ground truth.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use travia_core::SmootherConfig;
use travia_sim::scenarios::ScenarioId;
use travia_sim::{load_config, ScenarioResult, ScenarioRunner, SmoothingExport};

/// Travia trajectory smoothing simulator
#[derive(Parser, Debug)]
#[command(name = "travia-sim")]
#[command(about = "Run synthetic trajectory scenarios against the Travia smoother", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (straight_line, circular_arc, stationary, short_tracks,
    /// mixed_batch, noisy_highway, urban_grid, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export smoothed trajectories of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Smoother configuration JSON file
    #[arg(short, long)]
    config: Option<String>,

    /// Smooth tracks on the calling thread only
    #[arg(long)]
    sequential: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Travia Trajectory Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    let mut config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => SmootherConfig::default(),
    };
    if args.sequential {
        config.parallel = false;
    }

    // Determine base seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner = ScenarioRunner::new(seed).with_config(config);

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        let run = runner.execute(scenarios[0]);
        if let Err(e) = SmoothingExport::from_run(&run).write_to_file(export_path) {
            error!("Failed to write export: {}", e);
            std::process::exit(1);
        }
        info!("Exported {} vehicles to {}", run.dataset.tracks.len(), export_path);

        report(&[run.result], args.json);
        return;
    }

    let results: Vec<ScenarioResult> = scenarios.iter().map(|s| runner.run(*s)).collect();
    report(&results, args.json);
}

/// Prints the summary and exits non-zero if any scenario failed.
fn report(results: &[ScenarioResult], json: bool) {
    let total = results.len();
    let failed_count = results.iter().filter(|r| !r.passed).count();

    if json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                    "position_rmse": r.metrics.position.rmse(),
                    "heading_rmse": r.metrics.heading.rmse(),
                    "velocity_rmse": r.metrics.velocity.rmse(),
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
    } else {
        for result in results {
            if result.passed {
                info!(
                    "✓ {} (seed={}) PASSED, {} tracks / {} frames smoothed",
                    result.scenario.name(),
                    result.seed,
                    result.metrics.tracks_smoothed,
                    result.metrics.frames_smoothed
                );
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
