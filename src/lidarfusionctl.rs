// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use lidarfusion::args::CtlArgs;
use lidarfusion::background::{BackgroundSnapshot, CellState};
use lidarfusion::config::ParameterSet;

fn main() -> ExitCode {
    let args = CtlArgs::parse();

    if args.status {
        println!(
            "lidarfusionctl has no transport to a running process; \
             read health from the sink this pipeline was configured with instead."
        );
    }

    if let Some(path) = &args.inspect_snapshot {
        if let Err(err) = inspect_snapshot(path) {
            eprintln!("failed to inspect snapshot {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    }

    if let Some(path) = &args.dry_run_params {
        if let Err(err) = dry_run_params(path) {
            eprintln!("failed to validate parameter file {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    }

    if !args.status && args.inspect_snapshot.is_none() && args.dry_run_params.is_none() {
        println!("nothing to do; pass --status, --inspect-snapshot or --dry-run-params");
    }

    ExitCode::SUCCESS
}

fn inspect_snapshot(path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let snapshot: BackgroundSnapshot = bincode::deserialize(&bytes)?;

    let mut counts = [0usize; 5];
    for cell in &snapshot.cells {
        let idx = match cell.state {
            CellState::Empty => 0,
            CellState::Learning => 1,
            CellState::ObsStable => 2,
            CellState::Frozen => 3,
            CellState::Locked => 4,
        };
        counts[idx] += 1;
    }

    println!("rings: {}", snapshot.rings);
    println!("azimuth_bins: {}", snapshot.azimuth_bins);
    println!("cells: {}", snapshot.cells.len());
    println!("  empty: {}", counts[0]);
    println!("  learning: {}", counts[1]);
    println!("  obs_stable: {}", counts[2]);
    println!("  frozen: {}", counts[3]);
    println!("  locked: {}", counts[4]);
    Ok(())
}

fn dry_run_params(path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(path)?;
    let updates: serde_json::Value = serde_json::from_str(&contents)?;
    let mut params = ParameterSet::default();
    params.apply_update(&updates)?;
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}
