//! ReplayCheck Simulator CLI
//!
//! Run fault scenarios against the reference simulation and localize the
//! first divergent step.

use clap::Parser;
use replaycheck_core::{TrackerConfig, Window};
use replaycheck_sim::{
    dump_baseline, DivergenceReport, ScenarioId, ScenarioResult, ScenarioRunner, SimError,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// ReplayCheck divergence localization CLI
#[derive(Parser, Debug)]
#[command(name = "replaycheck-sim")]
#[command(about = "Localize replay divergences in a deterministic simulation", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (clean, entropy_leak, branch_flip, extra_call, dropped_probe,
    /// lockstep, runaway, long_haul, flaky, quick, all)
    #[arg(short = 'S', long, default_value = "quick")]
    scenario: String,

    /// Steps per replay (scenario default if omitted)
    #[arg(long)]
    steps: Option<u64>,

    /// Number of simulated entities
    #[arg(short, long, default_value = "8")]
    entities: usize,

    /// First position of the initial window
    #[arg(long)]
    start: Option<u64>,

    /// Last position of the initial window
    #[arg(long)]
    end: Option<u64>,

    /// Stride of the initial window
    #[arg(long)]
    stride: Option<u64>,

    /// Tracker configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Write divergence reports to this JSON file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write the baseline snapshot at the divergence position to this file
    #[arg(long)]
    dump: Option<PathBuf>,
}

impl Args {
    fn scenarios(&self) -> Result<Vec<ScenarioId>, SimError> {
        match self.scenario.as_str() {
            "all" => Ok(ScenarioId::all()),
            "quick" => Ok(ScenarioId::quick()),
            name => name.parse().map(|s| vec![s]).map_err(SimError::InvalidConfig),
        }
    }

    /// Window given on the command line, if any bound was set.
    fn window(&self) -> Result<Option<Window>, SimError> {
        if self.start.is_none() && self.end.is_none() && self.stride.is_none() {
            return Ok(None);
        }
        let window = Window::new(
            self.start.unwrap_or(Window::DEFAULT_START),
            self.end.unwrap_or(Window::DEFAULT_END),
            self.stride.unwrap_or(Window::DEFAULT_STEP),
        )?;
        Ok(Some(window))
    }

    fn tracker_config(&self) -> Result<TrackerConfig, SimError> {
        let config = match &self.config {
            Some(path) => TrackerConfig::from_path(path)?,
            None => TrackerConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn runner(&self, seed: u64) -> Result<ScenarioRunner, SimError> {
        let mut runner = ScenarioRunner::new(seed)
            .with_entities(self.entities)
            .with_tracker_config(self.tracker_config()?);
        if let Some(steps) = self.steps {
            runner = runner.with_steps(steps);
        }
        if let Some(window) = self.window()? {
            runner = runner.with_window(window);
        }
        Ok(runner)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn base_seed(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}

fn write_outputs(args: &Args, results: &[ScenarioResult]) -> Result<(), SimError> {
    if let Some(path) = &args.export {
        let reports: Vec<DivergenceReport> =
            results.iter().map(DivergenceReport::from_result).collect();
        let json = match reports.as_slice() {
            [single] => single.to_json()?,
            _ => serde_json::to_string_pretty(&reports)?,
        };
        std::fs::write(path, json)?;
        info!("Exported {} report(s) to {}", reports.len(), path.display());
    }

    if let Some(path) = &args.dump {
        let [result] = results else {
            return Err(SimError::InvalidConfig(
                "--dump only supports a single scenario".to_string(),
            ));
        };
        match dump_baseline(result, path)? {
            Some(bytes) => info!("Dumped {} baseline bytes to {}", bytes, path.display()),
            None => info!("No divergence, nothing dumped"),
        }
    }
    Ok(())
}

fn run(args: &Args) -> Result<Vec<ScenarioResult>, SimError> {
    let scenarios = args.scenarios()?;
    let seed = base_seed(args.seed);
    let runner = args.runner(seed)?;

    if !args.json {
        info!("ReplayCheck Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut results = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let result = runner.run(scenario);
        if !args.json {
            if result.passed {
                info!("✓ {} (seed={}) PASSED: {}", scenario.name(), seed, result.summary);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        results.push(result);
    }

    write_outputs(args, &results)?;
    Ok(results)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let results = match run(&args) {
        Ok(results) => results,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let total = results.len();
    let failed_count = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "steps": r.steps,
                    "passes": r.stats.passes,
                    "divergence": r.divergence,
                    "unreproduced": r.unreproduced,
                    "summary": r.summary,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render summary: {}", e),
        }
    } else {
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
