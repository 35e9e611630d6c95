//! ArmadaStep CLI Entry Point
//!
//! Plans the Armada commands for a step's task attempts.
//!
//! # Usage
//!
//! ```bash
//! # Show the remote command for one attempt of step "train"
//! armada-step flow.yaml train
//!
//! # Four splits, explicit backend settings and package
//! armada-step flow.yaml train --config armada.yaml --package code.tgz --splits 4
//!
//! # Second retry with a remote budget of one: runs locally
//! armada-step flow.yaml train --retry-count 2 --max-retries 1
//!
//! # Also record baseline metadata into the local stores
//! armada-step flow.yaml train --record --datastore /tmp/ds
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info};

use armada_step::environment::{ExecutionMode, RemoteConfig};
use armada_step::execution::{Engine, PackageArtifact, PlannedAttempt};
use armada_step::workflow::parser::load_workflow;
use armada_step::{APP_NAME, VERSION};

/// Backend settings file used when none is specified.
const DEFAULT_CONFIG: &str = "armada.yaml";

/// Default maximum parallel workers.
const DEFAULT_MAX_PARALLEL: usize = 4;

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    flow_path: String,
    step_name: String,
    config_path: String,
    package_path: Option<PathBuf>,
    run_id: Option<String>,
    splits: usize,
    retry_count: u32,
    max_retries: u32,
    max_parallel: usize,
    datastore: Option<PathBuf>,
    record: bool,
    failed: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flow_path: String::new(),
            step_name: String::new(),
            config_path: DEFAULT_CONFIG.to_string(),
            package_path: None,
            run_id: None,
            splits: 1,
            retry_count: 0,
            max_retries: 0,
            max_parallel: DEFAULT_MAX_PARALLEL,
            datastore: None,
            record: false,
            failed: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Remote step execution on Armada");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: armada-step [OPTIONS] <FLOW_FILE> <STEP>");
    println!();
    println!("Arguments:");
    println!("  <FLOW_FILE>          Path to the flow YAML file");
    println!("  <STEP>               Step to plan");
    println!();
    println!("Options:");
    println!("  --config FILE        Armada settings (default: {})", DEFAULT_CONFIG);
    println!("  --package FILE       Code package to upload (default: the flow file)");
    println!("  --run-id ID          Run identifier");
    println!("  --splits N           Number of task attempts (default: 1)");
    println!("  --retry-count N      Attempt number of every task (default: 0)");
    println!("  --max-retries N      Retries that may still run remotely (default: 0)");
    println!("  --parallel N         Maximum worker threads (default: {})", DEFAULT_MAX_PARALLEL);
    println!("  --datastore DIR      Local datastore directory");
    println!("  --record             Record baseline metadata for each attempt");
    println!("  --failed             Record attempts as failed instead of succeeded");
    println!("  --verbose            Enable debug logging");
    println!("  --help               Show this help message");
    println!("  --version            Show version information");
    println!();
    println!("Examples:");
    println!("  armada-step flow.yaml train");
    println!("  armada-step flow.yaml train --config armada.yaml --splits 4");
    println!("  armada-step flow.yaml train --record --datastore /tmp/ds");
}

/// Returns the value following an option, advancing the cursor.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", name))
}

/// Parses a numeric option value.
fn number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--record" => {
                config.record = true;
            }
            "--failed" => {
                config.failed = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--config" => {
                config.config_path = option_value(args, &mut i, "--config")?.to_string();
            }
            "--package" => {
                config.package_path = Some(PathBuf::from(option_value(args, &mut i, "--package")?));
            }
            "--run-id" => {
                config.run_id = Some(option_value(args, &mut i, "--run-id")?.to_string());
            }
            "--datastore" => {
                config.datastore = Some(PathBuf::from(option_value(args, &mut i, "--datastore")?));
            }
            "--splits" => {
                config.splits = number(option_value(args, &mut i, "--splits")?, "splits")?;
            }
            "--retry-count" => {
                let value = option_value(args, &mut i, "--retry-count")?;
                config.retry_count = number(value, "retry-count")?;
            }
            "--max-retries" => {
                let value = option_value(args, &mut i, "--max-retries")?;
                config.max_retries = number(value, "max-retries")?;
            }
            "--parallel" => {
                let value = option_value(args, &mut i, "--parallel")?;
                config.max_parallel = number(value, "parallel")?;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                // Positional argument
                match positional_index {
                    0 => config.flow_path = arg.clone(),
                    1 => config.step_name = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    if positional_index < 2 {
        return Err("FLOW_FILE and STEP are required".to_string());
    }
    if config.splits == 0 {
        return Err("--splits must be at least 1".to_string());
    }

    Ok(config)
}

/// Prints one line per planned attempt.
fn print_plan(attempts: &[PlannedAttempt]) {
    println!();
    for attempt in attempts {
        let label = if attempt.dispatched {
            "ARMADA".green().bold()
        } else {
            "LOCAL".yellow().bold()
        };
        println!(
            "[{}] task {} (attempt {}, {})",
            label, attempt.task_id, attempt.retry_count, attempt.state
        );
        println!("  Command: {}", attempt.command);
        if let Some(package) = &attempt.package {
            println!("  Package: {} ({})", package.address, package.digest.dimmed());
        }
        if let Some(outcome) = attempt.outcome {
            let text = outcome.to_string();
            let text = if outcome.is_success() { text.green() } else { text.red() };
            println!("  Outcome: {}", text);
        }
        if let Some(report) = &attempt.sync {
            println!(
                "  Metadata: {} copied, {} already present",
                report.copied, report.skipped
            );
        }
    }
    println!();
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    // Load flow
    info!("Loading flow: {}", config.flow_path);
    let workflow = load_workflow(&config.flow_path).map_err(|e| {
        error!("Failed to load flow: {}", e);
        format!("Could not load flow from '{}': {}", config.flow_path, e)
    })?;
    info!("Flow '{}' loaded: {} steps", workflow.name, workflow.len());

    // Load backend settings
    let remote = RemoteConfig::load(&config.config_path).map_err(|e| {
        format!(
            "Could not load Armada settings from '{}': {}",
            config.config_path, e
        )
    })?;

    let package = match &config.package_path {
        Some(path) => PackageArtifact::from_file(path)?,
        None => PackageArtifact::from_file(&config.flow_path)?,
    };
    info!("Code package: {} bytes", package.len());

    let mode = ExecutionMode::from_env();
    info!("Execution mode: {}", mode);

    // Create and configure engine
    let mut engine = Engine::new(Arc::new(workflow), &config.step_name, remote);
    engine.set_mode(mode);
    engine.set_package(package);
    engine.set_splits(config.splits);
    engine.set_retry_count(config.retry_count);
    engine.set_max_retries(config.max_retries);
    engine.set_max_parallel(config.max_parallel);
    engine.set_record(config.record);
    engine.set_task_ok(!config.failed);

    if let Some(run_id) = config.run_id {
        engine.set_run_id(run_id);
    }

    if let Some(dir) = config.datastore {
        engine.set_datastore_root(dir);
    }

    let attempts = engine.run()?;
    print_plan(&attempts);

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
