use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use rs_twist_controller::augmented_solver::AugmentedSolver;
use rs_twist_controller::jacobian::FixedJacobian;
use rs_twist_controller::parameters::SolverParameters;
use rs_twist_controller::scenario::Scenario;
use rs_twist_controller::utils::dump_velocities;

/// Runs the twist controller over a scenario with a fixed Jacobian and prints the
/// joint velocity commands (chain joints in degrees per second).
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// YAML file with the solver parameters.
    #[arg(short, long)]
    params: PathBuf,

    /// YAML file with the Jacobian, start configuration and desired twist.
    #[arg(short, long)]
    scenario: PathBuf,

    /// Print the parameters in effect before running.
    #[arg(long)]
    show_params: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let params = SolverParameters::from_yaml_file(&cli.params)
        .with_context(|| format!("Failed to load parameters from {}", cli.params.display()))?;
    let scenario = Scenario::from_yaml_file(&cli.scenario)
        .with_context(|| format!("Failed to load scenario from {}", cli.scenario.display()))?;

    if cli.show_params {
        println!("{}", params.to_yaml());
    }

    let dof = params.dof;
    let kinematics = Arc::new(FixedJacobian::new(scenario.jacobian.clone()));
    let mut solver = AugmentedSolver::new(params, kinematics)
        .context("Parameters do not match the scenario")?;

    let commands = scenario.run(&mut solver).context("Solver failed")?;
    for command in &commands {
        dump_velocities(command, dof);
    }
    Ok(())
}
