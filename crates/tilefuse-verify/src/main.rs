use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use tilefuse_graph::{PlanDoc, ProblemDoc};

/// tilefuse-verify — standalone plan validator
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Problem document the plan was produced from (JSON)
    input: PathBuf,

    /// Plan document to verify (JSON)
    plan: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<bool> {
    env_logger::try_init().ok();

    let cli = Cli::parse();

    let problem: ProblemDoc = read_json(&cli.input)?;
    let problem = problem
        .into_problem()
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("invalid problem")?;
    let plan: PlanDoc = read_json(&cli.plan)?;

    println!(
        "=== verification: {} ops, {} subgraphs ===",
        problem.op_count(),
        plan.subgraph_count(),
    );

    let report = tilefuse_verify::verify(&problem, &plan)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("plan document is malformed")?;

    for check in &report.checks {
        println!("[{}] {}", if check.passed { "PASS" } else { "FAIL" }, check.name);
        for detail in &check.details {
            println!("  {detail}");
        }
    }
    for note in &report.notes {
        println!("  [INFO] {note}");
    }

    println!("[INFO] total reported latency:   {:.1}", report.total_reported);
    println!("[INFO] total recomputed latency: {:.1}", report.total_recomputed);
    println!("[INFO] unfused baseline:         {:.1}", report.unfused_baseline);
    println!("[INFO] fusion speedup:           {:.2}x", report.speedup());

    if report.passed() {
        println!("=== ALL CHECKS PASSED ===");
    } else {
        println!("=== SOME CHECKS FAILED ===");
    }
    Ok(report.passed())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> miette::Result<T> {
    let source = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&source)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_two_positional_args() {
        let cli = Cli::try_parse_from(["tilefuse-verify", "in.json", "plan.json"]).unwrap();
        assert_eq!(cli.input, PathBuf::from("in.json"));
        assert_eq!(cli.plan, PathBuf::from("plan.json"));
    }

    #[test]
    fn cli_requires_both_paths() {
        assert!(Cli::try_parse_from(["tilefuse-verify", "only.json"]).is_err());
    }
}
