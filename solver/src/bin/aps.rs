use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aps::problem::load_problem;
use aps::Solver;

/// An approximate problem solver for discrete state-space puzzles.
#[derive(Debug, Parser)]
#[command(name = "aps")]
struct Opt {
    /// Path to the problem description (JSON).
    problem: PathBuf,
    /// Base directory for `cache/` and `output/`; defaults to the problem
    /// file's directory.
    #[arg(long, short)]
    base: Option<PathBuf>,
    /// Seed for the random source; a random seed is drawn when absent.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let opt = Opt::parse();
    ensure!(
        opt.problem.exists(),
        "problem file {} does not exist",
        opt.problem.display()
    );
    let problem_file = opt.problem.canonicalize()?;
    let base = match opt.base {
        Some(b) => b,
        None => problem_file
            .parent()
            .context("problem file has no parent directory")?
            .to_path_buf(),
    };
    let run = problem_file
        .file_stem()
        .context("problem file has no stem")?
        .to_string_lossy()
        .into_owned();

    let (problem, params) = load_problem(&problem_file)?;
    let seed = opt.seed.unwrap_or_else(rand::random);
    let mut solver = Solver::new(problem, params, seed);
    solver.load(Some(&base.join("cache").join(&run)))?;
    let solved = solver.run();
    solver.close(&base, &run)?;
    if solved {
        println!("Arrived at the final state!");
    } else {
        println!("Iteration budget exhausted without reaching the final state.");
    }
    Ok(())
}
