//! numu Simulation CLI
//!
//! Run the reconstruction scenarios on oracle events, or reconstruct a
//! JSON-lines file of recorded events.

use clap::Parser;
use numu_core::{Assembler, OutputRow, RecoError, RunContext, SelectionConfig};
use numu_records::{EventSource, JsonLinesSource, RecordError};
use numu_sim::scenarios::ScenarioId;
use numu_sim::{RowExport, ScenarioResult, ScenarioRunner};
use thiserror::Error;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Errors that end the CLI run.
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] RecoError),

    #[error(transparent)]
    Records(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

/// numu reconstruction harness
#[derive(Parser, Debug)]
#[command(name = "numu-sim")]
#[command(about = "Run reconstruction scenarios or reconstruct recorded events", long_about = None)]
struct Args {
    /// Master seed for the oracle
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (contained_muon, truth_completeness, empty_event, crt_timing, containment_cut, cosmic_rejection, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Events generated per scenario
    #[arg(short, long, default_value = "20")]
    events: usize,

    /// Reconstruct this JSON-lines event file instead of running scenarios
    #[arg(short, long)]
    input: Option<String>,

    /// JSON selection configuration (defaults otherwise)
    #[arg(short, long)]
    config: Option<String>,

    /// Write output rows to this JSON file
    #[arg(long)]
    export: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary for CI parsing
    #[arg(long)]
    json: bool,
}

fn load_config(path: Option<&str>) -> Result<SelectionConfig, CliError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(SelectionConfig::from_json(&text)?)
        }
        None => Ok(SelectionConfig::default()),
    }
}

/// Reconstruct every event of a JSON-lines file.
fn run_input(args: &Args, input: &str) -> Result<(), CliError> {
    let mut config = load_config(args.config.as_deref())?;
    config.verbose |= args.verbose;
    let assembler = Assembler::new(config)?;
    let mut source = JsonLinesSource::open(input)?;

    let mut ctx = RunContext::new();
    let mut rows: Vec<OutputRow> = Vec::new();
    let mut skipped = 0usize;
    while let Some(event) = source.next_event() {
        match event {
            Ok(records) => {
                let out = assembler.process_event(&records, &mut ctx);
                rows.extend(out.selected.iter().map(OutputRow::from_selected));
            }
            Err(RecordError::Io(e)) => return Err(e.into()),
            Err(e) => {
                debug!("{}", e);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        error!("{} of {} events could not be decoded", skipped, source.events_read());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ctx).map_err(|e| CliError::Usage(e.to_string()))?);
    } else {
        ctx.log_summary();
    }

    if let Some(path) = &args.export {
        let mut export = RowExport::new(input, None);
        export.add(rows, &ctx);
        export.write_to_file(path)?;
        info!("Exported {} rows to {}", export.rows.len(), path);
    }
    Ok(())
}

/// Run the oracle scenarios; returns the number of failed runs.
fn run_scenarios(args: &Args) -> Result<usize, CliError> {
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().map_err(CliError::Usage)?]
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut export = args.export.as_ref().map(|_| RowExport::new(&args.scenario, Some(args.seed)));

    for seed_offset in 0..args.seeds {
        let seed = args.seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed).with_events(args.events);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            if let Some(export) = export.as_mut() {
                export.add(result.rows.iter().cloned(), &result.context);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "events": r.context.events_processed,
                    "kept": r.context.interactions_kept,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", summary);
    } else if failed == 0 {
        info!("All {} scenario runs passed", total);
    } else {
        error!("{}/{} scenario runs failed", failed, total);
    }

    if let (Some(export), Some(path)) = (&export, &args.export) {
        export.write_to_file(path)?;
        info!("Exported {} rows to {}", export.rows.len(), path);
    }
    Ok(failed)
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let outcome = match &args.input {
        Some(input) => run_input(&args, input).map(|()| 0),
        None => {
            if !args.json {
                info!("numu reconstruction harness v{}", env!("CARGO_PKG_VERSION"));
            }
            run_scenarios(&args)
        }
    };

    match outcome {
        Ok(0) => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}
