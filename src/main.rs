use mutacov::coverage::InMemoryCoverage;
use mutacov::engine::{DirByteSource, ManifestEngine};
use mutacov::filter::Unfiltered;
use mutacov::output;
use mutacov::source::{MutationConfig, MutationSource};
use mutacov::transform::{self, CoverageTransformer, NamePatterns, Transformed};
use mutacov::unit::UnitName;

use std::process;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mutacov", version, about = "Coverage probes and test assignment for wasm mutation testing")]
struct Cli {
    /// Log debug details to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert coverage probes into a wasm unit
    Instrument {
        /// Module to instrument
        input: Utf8PathBuf,
        /// Qualified unit name (default: the file stem)
        #[arg(short, long)]
        unit: Option<String>,
        /// Glob over unit names selecting what to instrument
        #[arg(short, long = "include", env = "MUTACOV_INCLUDE", value_delimiter = ',', default_value = "*")]
        include: Vec<String>,
        /// Where to write the result (default: <input>.instrumented.wasm)
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// List each unit's mutants with the tests to run against them
    Plan {
        /// Units to plan, as qualified names
        #[arg(required = true)]
        units: Vec<String>,
        /// Root directory holding <a>/<b>/<C>.wasm units
        #[arg(long, env = "MUTACOV_UNITS_DIR")]
        units_dir: Utf8PathBuf,
        /// JSON manifest of mutation candidates per unit
        #[arg(short, long)]
        manifest: Utf8PathBuf,
        /// JSON line coverage; without it every mutant is uncovered
        #[arg(short, long)]
        coverage: Option<Utf8PathBuf>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Run the wasm validator over a unit
    Check {
        input: Utf8PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match cli.command {
        Commands::Instrument {
            input,
            unit,
            include,
            output,
            json,
        } => cmd_instrument(&input, unit, &include, output, json),
        Commands::Plan {
            units,
            units_dir,
            manifest,
            coverage,
            json,
        } => cmd_plan(&units, units_dir, &manifest, coverage.as_deref(), json),
        Commands::Check { input } => cmd_check(&input),
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "mutacov=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_instrument(
    input: &Utf8Path,
    unit: Option<String>,
    include: &[String],
    output_path: Option<Utf8PathBuf>,
    json_mode: bool,
) -> i32 {
    let unit = UnitName::new(unit.unwrap_or_else(|| input.file_stem().unwrap_or("unit").to_string()));

    let patterns = match NamePatterns::new(include) {
        Ok(p) => p,
        Err(e) => {
            output::print_error(&format!("Invalid --include pattern: {}", e));
            return 2;
        }
    };

    let bytes = match std::fs::read(input) {
        Ok(b) => b,
        Err(e) => {
            output::print_error(&format!("Failed to read {}: {}", input, e));
            return 2;
        }
    };

    let transformer = CoverageTransformer::new(patterns);
    let transformed = match transformer.transform(&unit, &bytes) {
        Ok(t) => t,
        Err(e) => {
            output::print_error(&e.to_string());
            return 1;
        }
    };

    let output_path = output_path.unwrap_or_else(|| input.with_extension("instrumented.wasm"));
    let probes = match &transformed {
        Transformed::Instrumented(instrumented) => {
            if !json_mode {
                output::print_instrumented(&unit, instrumented, bytes.len());
            }
            instrumented.probes.len()
        }
        Transformed::Unchanged => {
            if !json_mode {
                output::print_success(&format!("{}: not selected, copied unchanged", unit));
            }
            0
        }
    };
    let instrumented = transformed.is_instrumented();

    if let Err(e) = std::fs::write(&output_path, transformed.into_bytes(&bytes)) {
        output::print_error(&format!("Failed to write {}: {}", output_path, e));
        return 2;
    }

    if json_mode {
        let report = serde_json::json!({
            "unit": unit,
            "instrumented": instrumented,
            "probes": probes,
            "output": output_path,
        });
        println!("{}", report);
    }
    0
}

fn cmd_plan(
    units: &[String],
    units_dir: Utf8PathBuf,
    manifest: &Utf8Path,
    coverage: Option<&Utf8Path>,
    json_mode: bool,
) -> i32 {
    let engine = match ManifestEngine::from_json_file(manifest) {
        Ok(e) => e,
        Err(e) => {
            output::print_error(&e.to_string());
            return 2;
        }
    };

    let coverage = match coverage {
        Some(path) => match InMemoryCoverage::from_json_file(path) {
            Ok(c) => c,
            Err(e) => {
                output::print_error(&e.to_string());
                return 2;
            }
        },
        None => InMemoryCoverage::new(),
    };

    let source = MutationSource::new(
        MutationConfig::new(Arc::new(engine)),
        Arc::new(Unfiltered),
        Arc::new(coverage),
        Arc::new(DirByteSource::new(units_dir)),
    );

    let units: Vec<UnitName> = units.iter().map(|u| UnitName::new(u.as_str())).collect();
    let outcomes = source.create_all(&units);
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();

    if json_mode {
        let plans: Vec<output::UnitPlan> = outcomes
            .iter()
            .map(|o| match &o.result {
                Ok(mutations) => output::UnitPlan {
                    unit: &o.unit,
                    error: None,
                    mutations,
                },
                Err(e) => output::UnitPlan {
                    unit: &o.unit,
                    error: Some(e.to_string()),
                    mutations: &[],
                },
            })
            .collect();
        match serde_json::to_string(&plans) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                output::print_error(&format!("Failed to serialize plan: {}", e));
                return 2;
            }
        }
    } else {
        for outcome in &outcomes {
            match &outcome.result {
                Ok(mutations) => output::print_unit_plan(&outcome.unit, mutations),
                Err(e) => output::print_error(&format!("{}: skipped ({})", outcome.unit, e)),
            }
        }
    }

    if failed > 0 { 1 } else { 0 }
}

fn cmd_check(input: &Utf8Path) -> i32 {
    let bytes = match std::fs::read(input) {
        Ok(b) => b,
        Err(e) => {
            output::print_error(&format!("Failed to read {}: {}", input, e));
            return 2;
        }
    };
    match transform::verify(&bytes) {
        Ok(()) => {
            output::print_success(&format!("{}: valid", input));
            0
        }
        Err(e) => {
            output::print_error(&format!("{}: {}", input, e));
            1
        }
    }
}
