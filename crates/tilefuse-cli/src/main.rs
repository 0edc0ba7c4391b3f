use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use tilefuse_graph::ProblemDoc;

/// tilefuse — fusion/tiling scheduler for tiled tensor graphs
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input problem document (JSON)
    input: PathBuf,

    /// Output plan document (JSON)
    output: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    env_logger::try_init().ok();

    let cli = Cli::parse();

    // 1. Read and parse the problem document.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;
    let doc: ProblemDoc = serde_json::from_str(&source)
        .into_diagnostic()
        .wrap_err("problem document parse failed")?;

    // 2. Validate and derive the immutable problem.
    let problem = doc
        .into_problem()
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("invalid problem")?;

    log::info!(
        "problem: {} tensors, {} ops, fast_cap={} slow_bw={} native=[{},{}]",
        problem.tensor_count(),
        problem.op_count(),
        problem.fast_cap(),
        problem.slow_bw(),
        problem.nat_w(),
        problem.nat_h(),
    );

    // 3. Optimize.
    let plan = tilefuse_opt::optimize(&problem).map_err(|e| miette::miette!("{e}"))?;

    for i in 0..plan.subgraph_count() {
        let [w, h, k] = plan.granularities[i];
        log::info!(
            "  SG[{i}] ops={} gran=[{w},{h},{k}]{} retain={} lat={}",
            plan.subgraphs[i].len(),
            if plan.traversal_orders[i].is_some() {
                " zigzag"
            } else {
                ""
            },
            plan.tensors_to_retain[i].len(),
            plan.subgraph_latencies[i],
        );
    }
    log::info!("total latency: {}", plan.total_latency());

    // 4. Write the plan document.
    let json = serde_json::to_string_pretty(&plan).into_diagnostic()?;
    std::fs::write(&cli.output, json)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write {}", cli.output.display()))?;

    Ok(())
}
