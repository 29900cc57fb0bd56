// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use hetersim_config::{Scenario, ScenarioLimits, StopReason};
use hetersim_core::host::{HostInitiator, HostReport};
use hetersim_core::metrics::PerformanceMetrics;
use hetersim_core::system::builder::build_system_from_path;
use hetersim_core::System;

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

const START_BANNER: &str = "NPU hetero system instantiated; starting simulation.";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Heterogeneous NPU/DMA system simulator",
    long_about = None,
    subcommand_negates_reqs = true
)]
struct Cli {
    /// Path to the system manifest (YAML)
    #[arg(short, long, required = true)]
    system: Option<PathBuf>,

    /// Absolute tick limit for the run
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Write a state snapshot (JSON) at the end of the run.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print access and event counters at the end of the run
    #[arg(long)]
    metrics: bool,

    /// Enable per-access and per-event tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a host scenario (YAML) against a system and check its expectations.
    Test(TestArgs),

    /// Print the address map of a system manifest.
    Map(MapArgs),
}

#[derive(Parser, Debug)]
struct TestArgs {
    /// Path to the scenario script (YAML)
    #[arg(short = 'c', long)]
    scenario: PathBuf,

    /// Path to the system manifest; overrides the one named by the scenario
    #[arg(short = 's', long)]
    system: Option<PathBuf>,

    /// Override the scenario's tick limit
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Directory to write test artifacts (result.json, snapshot.json)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct MapArgs {
    /// Path to the system manifest (YAML)
    #[arg(short, long)]
    system: PathBuf,
}

#[derive(Debug, Serialize)]
struct TestResult {
    result_schema_version: String,
    status: String,
    stop_reason: StopReason,
    end_tick: u64,
    steps_run: usize,
    steps_total: usize,
    failures: Vec<String>,
    limits: ScenarioLimits,
    accesses: u64,
    events: u64,
    scenario: PathBuf,
    system: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Test(args)) => run_test(args),
        Some(Commands::Map(args)) => run_map(args),
        None => run_system(cli),
    }
}

fn load_system(path: &Path) -> Option<System> {
    match build_system_from_path(path) {
        Ok(system) => Some(system),
        Err(e) => {
            error!("{:#}", e);
            None
        }
    }
}

fn print_exit(tick: u64, reason: StopReason) {
    println!("Exited at tick {} because {}", tick, reason.cause());
}

fn write_snapshot(system: &System, path: &Path) -> bool {
    let json = match system.snapshot().to_json_pretty() {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize snapshot: {}", e);
            return false;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("Failed to create snapshot directory {:?}: {}", parent, e);
            return false;
        }
    }
    match std::fs::write(path, json) {
        Ok(()) => {
            info!("Snapshot written to {:?}", path);
            true
        }
        Err(e) => {
            error!("Failed to write snapshot to {:?}: {}", path, e);
            false
        }
    }
}

fn run_system(cli: Cli) -> ExitCode {
    let Some(system_path) = cli.system else {
        error!("--system is required");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    let Some(mut system) = load_system(&system_path) else {
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    let metrics = Arc::new(PerformanceMetrics::new());
    system.observers.push(metrics.clone());

    println!("{}", START_BANNER);
    system.notify_start();
    let reason = match system.run(cli.max_ticks) {
        Ok(r) => r,
        Err(e) => {
            error!("Simulation error: {}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };
    system.notify_stop();
    print_exit(system.now(), reason);

    if cli.metrics {
        println!("{}", metrics.summary());
    }
    if let Some(path) = &cli.snapshot {
        if !write_snapshot(&system, path) {
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }
    ExitCode::from(EXIT_PASS)
}

fn run_map(args: MapArgs) -> ExitCode {
    let Some(system) = load_system(&args.system) else {
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    println!("{}", system.name());
    for (bus, range, id) in system.router().mappings() {
        println!(
            "  {:#010x}-{:#010x}  {:<10} {}",
            range.base,
            range.last(),
            bus,
            system.device_name(id).unwrap_or("?")
        );
    }
    ExitCode::from(EXIT_PASS)
}

fn resolve_system_path(args: &TestArgs, scenario: &Scenario) -> Option<PathBuf> {
    if let Some(p) = &args.system {
        return Some(p.clone());
    }
    let rel = scenario.system.as_deref()?;
    let base = args.scenario.parent().unwrap_or_else(|| Path::new("."));
    Some(base.join(rel))
}

fn run_test(args: TestArgs) -> ExitCode {
    let mut scenario = match Scenario::from_file(&args.scenario) {
        Ok(s) => s,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Some(max) = args.max_ticks {
        scenario.limits.max_ticks = Some(max);
    }

    let Some(system_path) = resolve_system_path(&args, &scenario) else {
        error!("No system manifest: pass --system or set 'system' in the scenario");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    let Some(mut system) = load_system(&system_path) else {
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    let metrics = Arc::new(PerformanceMetrics::new());
    system.observers.push(metrics.clone());

    println!("{}", START_BANNER);
    let report = HostInitiator::new(&mut system, scenario.limits.clone()).run(&scenario.steps);
    print_exit(report.end_tick, report.stop_reason);
    for failure in &report.failures {
        println!("FAIL {}", failure);
    }

    let (status, code) = classify(&report);
    if let Some(dir) = &args.output_dir {
        let result = TestResult {
            result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
            status: status.to_string(),
            stop_reason: report.stop_reason,
            end_tick: report.end_tick,
            steps_run: report.steps_run,
            steps_total: scenario.steps.len(),
            failures: report.failures.clone(),
            limits: scenario.limits.clone(),
            accesses: metrics.get_accesses(),
            events: metrics.get_events(),
            scenario: args.scenario.clone(),
            system: system_path.clone(),
        };
        if !write_outputs(dir, &result, &system) {
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }
    ExitCode::from(code)
}

fn classify(report: &HostReport) -> (&'static str, u8) {
    match report.stop_reason {
        StopReason::ScriptComplete if report.failures.is_empty() => ("pass", EXIT_PASS),
        StopReason::AccessFault => ("error", EXIT_RUNTIME_ERROR),
        _ => ("fail", EXIT_ASSERT_FAIL),
    }
}

fn write_outputs(dir: &Path, result: &TestResult, system: &System) -> bool {
    if let Err(e) = std::fs::create_dir_all(dir) {
        error!("Failed to create output directory {:?}: {}", dir, e);
        return false;
    }
    let json = match serde_json::to_string_pretty(result) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize result: {}", e);
            return false;
        }
    };
    if let Err(e) = std::fs::write(dir.join("result.json"), json) {
        error!("Failed to write result.json: {}", e);
        return false;
    }
    write_snapshot(system, &dir.join("snapshot.json"))
}
