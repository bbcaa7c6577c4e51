// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! QubitOS Dynamics CLI
//!
//! Runs small reference simulations and inspects solver configuration.
//!
//! # Usage
//!
//! ```bash
//! # Resonant Rabi oscillation over one period
//! qubit-os-dyn rabi --omega 1.0 --duration 6.283
//!
//! # Damped oscillation with the gradient of ⟨σz⟩(T) in ω, as JSON
//! qubit-os-dyn rabi --t1 20 --t2 15 --gradient --json
//!
//! # Show effective configuration
//! qubit-os-dyn --config solver.yaml config
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qubit_os_dynamics::operator::standard::{basis, decoherence, sigma_x, sigma_z};
use qubit_os_dynamics::{
    Coefficient, Config, Diagnostics, Error, ExpectationObjective, Operator, Problem, Result,
    State, VERSION,
};

/// QubitOS differentiable quantum dynamics
#[derive(Parser)]
#[command(name = "qubit-os-dyn")]
#[command(author = "QubitOS Contributors")]
#[command(version = VERSION)]
#[command(about = "Differentiable time integration for closed and open quantum systems")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a driven qubit starting in |0⟩
    Rabi {
        /// Rabi frequency ω in H = ω/2 σx + Δ/2 σz
        #[arg(long, default_value_t = 1.0)]
        omega: f64,

        /// Detuning Δ
        #[arg(long, default_value_t = 0.0)]
        detuning: f64,

        /// Total evolution time
        #[arg(long, default_value_t = std::f64::consts::PI)]
        duration: f64,

        /// Number of save times, including t = 0
        #[arg(long, default_value_t = 11)]
        points: usize,

        /// Relaxation time; enables amplitude damping
        #[arg(long)]
        t1: Option<f64>,

        /// Coherence time; requires --t1
        #[arg(long, requires = "t1")]
        t2: Option<f64>,

        /// Step method (euler, rk4, dopri5, tsit5, dopri8, expm, krylov[:m], rouchon1[:raw])
        #[arg(long, env = "QUBITOS_DYN_METHOD")]
        method: Option<String>,

        /// Fixed step size; switches off adaptive stepping
        #[arg(long)]
        dt: Option<f64>,

        /// Also report d⟨σz⟩(T)/dω from the adjoint pass
        #[arg(long)]
        gradient: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show effective configuration
    Config,

    /// Validate configuration file
    Validate,
}

/// Output of the `rabi` command.
#[derive(Serialize)]
struct RabiReport {
    times: Vec<f64>,
    sigma_z: Vec<f64>,
    excited_population: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    d_sigma_z_d_omega: Option<f64>,
    diagnostics: Diagnostics,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Rabi {
            omega,
            detuning,
            duration,
            points,
            t1,
            t2,
            method,
            dt,
            gradient,
            json,
        } => {
            // Override config with CLI args
            if let Some(method) = method {
                config.solver.method = method.parse()?;
            }
            if let Some(dt) = dt {
                config.solver.fixed_step = true;
                config.solver.dt = Some(dt);
            }
            config.validate()?;

            let report = run_rabi(&config, omega, detuning, duration, points, t1, t2, gradient)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_table(&report);
            }
        }

        Commands::Config => {
            // Show effective configuration
            println!("{}", serde_yaml::to_string(&config)?);
        }

        Commands::Validate => {
            // Validate configuration
            match config.validate() {
                Ok(()) => {
                    println!("Configuration is valid");
                }
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[allow(clippy::too_many_arguments)]
fn run_rabi(
    config: &Config,
    omega: f64,
    detuning: f64,
    duration: f64,
    points: usize,
    t1: Option<f64>,
    t2: Option<f64>,
    gradient: bool,
) -> Result<RabiReport> {
    if points < 2 {
        return Err(Error::Config("--points must be at least 2".into()));
    }
    if !(duration.is_finite() && duration > 0.0) {
        return Err(Error::Config(format!(
            "--duration must be positive, got {}",
            duration
        )));
    }

    let hamiltonian = Operator::new(vec![
        (sigma_x(), Coefficient::param_scaled(0, 0.5)),
        (sigma_z(), Coefficient::constant(0.5 * detuning)),
    ])?;
    let jump_ops = match (t1, t2) {
        (Some(t1), Some(t2)) => decoherence(t1, t2)?,
        (Some(t1), None) => decoherence(t1, 2.0 * t1)?,
        _ => Vec::new(),
    };
    let save_times = (0..points).map(|k| duration * k as f64 / (points - 1) as f64);

    let problem = Problem::builder(hamiltonian, State::ket(basis(2, 0))?)
        .jump_ops(jump_ops)
        .save_times(save_times)
        .observable(Operator::constant(sigma_z())?)
        .params(vec![omega])
        .config(config.solver.clone())
        .build()?;

    info!(
        version = VERSION,
        method = %config.solver.method,
        omega,
        detuning,
        duration,
        open = !problem.jump_ops().is_empty(),
        "Running Rabi simulation"
    );

    let (solution, d_sigma_z_d_omega) = if gradient {
        let (solution, grads) = problem.value_and_grad(&ExpectationObjective::final_value(0))?;
        (solution, Some(grads.params[0]))
    } else {
        (problem.solve()?, None)
    };

    let sigma_z: Vec<f64> = solution.expect(0, 0).iter().map(|z| z.re).collect();
    Ok(RabiReport {
        times: solution.times().to_vec(),
        excited_population: sigma_z.iter().map(|z| 0.5 * (1.0 - z)).collect(),
        sigma_z,
        d_sigma_z_d_omega,
        diagnostics: solution.diagnostics().clone(),
    })
}

fn print_table(report: &RabiReport) {
    println!("{:>12}  {:>12}  {:>12}", "t", "<sz>", "P(|1>)");
    for ((t, z), p) in report
        .times
        .iter()
        .zip(&report.sigma_z)
        .zip(&report.excited_population)
    {
        println!("{:>12.6}  {:>12.6}  {:>12.6}", t, z, p);
    }
    if let Some(g) = report.d_sigma_z_d_omega {
        println!("d<sz>(T)/domega = {:.8}", g);
    }
    let d = &report.diagnostics;
    println!(
        "{}: {} accepted, {} rejected, {} evaluations",
        d.method, d.accepted_steps, d.rejected_steps, d.rhs_evaluations
    );
}
