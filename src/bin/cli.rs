//! Command-line interface for rdisp
//!
//! # Usage
//!
//! ```bash
//! # Fit one equation with bootstrap errors
//! rdisp fit data.json -e CPMGFAST --samples 100 --seed 7
//!
//! # Rank several equations by AICc
//! rdisp compare data.json -e NOEX -e CPMGFAST -e CPMGSLOW
//!
//! # List the equations of a family
//! rdisp equations cest
//!
//! # Sample fitted curves for plotting
//! rdisp plot data.json -e R1RHOPERTURBATION -n 100
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rdisp::{
    config::FitOptions,
    data::{Dataset, Experiment},
    equations::Equation,
    fitting::Fitter,
    info::comparison_table,
    optim::FitError,
};
use serde_json::json;

/// Main CLI configuration struct
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Fit one equation to a dataset
    Fit {
        /// Path to the dataset JSON
        path: PathBuf,

        /// Equation name
        #[arg(short, long)]
        equation: String,

        /// Options JSON; missing fields take their defaults
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// Number of bootstrap replicates
        #[arg(long)]
        samples: Option<usize>,

        /// Seed of the session random stream
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the bootstrap
        #[arg(long)]
        no_errors: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fit several equations and rank them by AICc
    Compare {
        /// Path to the dataset JSON
        path: PathBuf,

        /// Equation names, all of the family when omitted
        #[arg(short, long)]
        equation: Vec<String>,

        /// Options JSON; missing fields take their defaults
        #[arg(short, long)]
        options: Option<PathBuf>,
    },
    /// List registered equations
    Equations {
        /// Experiment family (cpmg, cest, r1rho, exp); all when omitted
        family: Option<String>,
    },
    /// Fit one equation and print sampled curves as JSON
    Plot {
        /// Path to the dataset JSON
        path: PathBuf,

        /// Equation name
        #[arg(short, long)]
        equation: String,

        /// Points per curve
        #[arg(short, long, default_value_t = 100)]
        n: usize,

        /// Options JSON; missing fields take their defaults
        #[arg(short, long)]
        options: Option<PathBuf>,
    },
}

/// Main entry point for the CLI application
pub fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "Error:".bold().red(), err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), FitError> {
    match command {
        Commands::Fit {
            path,
            equation,
            options,
            samples,
            seed,
            no_errors,
            json,
        } => {
            let data = load_dataset(&path)?;
            let mut options = load_options(options.as_deref())?;
            if let Some(samples) = samples {
                options.sample_size = samples;
            }
            if let Some(seed) = seed {
                options.seed = seed;
            }
            if no_errors {
                options.calc_error = false;
            }

            let result = Fitter::new(options)?.fit(&data, &equation, None)?;
            if json {
                println!("{}", to_json(&result)?);
            } else {
                println!("{}", result);
            }
        }
        Commands::Compare {
            path,
            equation,
            options,
        } => {
            let data = load_dataset(&path)?;
            let names = if equation.is_empty() {
                Equation::names(data.experiment())
                    .into_iter()
                    .map(String::from)
                    .collect()
            } else {
                equation
            };
            let names = names.iter().map(String::as_str).collect::<Vec<_>>();

            let fitter = Fitter::new(load_options(options.as_deref())?)?.with_progress(|done, total, name| {
                eprintln!("{} {}/{} {}", "Fitted".green(), done, total, name);
            });
            let results = fitter.fit_all(&data, &names)?;
            println!("{}", comparison_table(&results));
            if let Some(best) = results.first() {
                println!("Best model: {}", best.equation_name().bold());
            }
        }
        Commands::Equations { family } => {
            let families = match family {
                Some(family) => vec![family.parse::<Experiment>()?],
                None => Experiment::ALL.to_vec(),
            };
            for family in families {
                println!("{}", family.to_string().bold());
                for name in Equation::names(family) {
                    println!("  {}", name);
                }
            }
        }
        Commands::Plot {
            path,
            equation,
            n,
            options,
        } => {
            let data = load_dataset(&path)?;
            let result = Fitter::new(load_options(options.as_deref())?)?.fit(&data, &equation, None)?;
            let curves = result
                .curve_fits
                .iter()
                .map(|c| {
                    json!({
                        "residue": c.residue,
                        "state": c.state,
                        "equation": c.plot.equation,
                        "points": c.plot.sample(n),
                    })
                })
                .collect::<Vec<_>>();
            println!("{}", to_json(&curves)?);
        }
    }
    Ok(())
}

fn load_dataset(path: &Path) -> Result<Dataset, FitError> {
    let content = std::fs::read_to_string(path).map_err(|e| FitError::Config {
        message: format!("{}: {}", path.display(), e),
    })?;
    serde_json::from_str(&content).map_err(|e| FitError::Config {
        message: format!("{}: {}", path.display(), e),
    })
}

fn load_options(path: Option<&Path>) -> Result<FitOptions, FitError> {
    match path {
        Some(path) => FitOptions::from_file(path),
        None => Ok(FitOptions::default()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, FitError> {
    serde_json::to_string_pretty(value).map_err(|e| FitError::Config {
        message: e.to_string(),
    })
}
