// OUU compiler CLI
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use ouuc::codegen::render_script;
use ouuc::engine::{EngineConfig, EngineEvent, PsuadeEngine};
use ouuc::job::{compile, JobOutcome, OuuConfig, OuuJob};
use ouuc::problem::OuuProblem;
use ouuc::samples::{write_sample, SampleFile};
use ouuc::scenario::{compress, Subsampler};

#[derive(Parser)]
#[command(name = "ouuc")]
#[command(version)]
#[command(about = "Optimization under uncertainty with the PSUADE engine", long_about = None)]
struct Cli {
    /// PSUADE executable (detected when omitted)
    #[arg(long, global = true, env = "PSUADE", value_name = "PATH")]
    psuade: Option<PathBuf>,

    /// Scratch directory for generated files
    #[arg(long, global = true, default_value = "OUU_files")]
    work_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the problem file and command script without running the engine
    Compile {
        /// Problem description (JSON)
        #[arg(value_name = "PROBLEM")]
        problem: PathBuf,

        /// Seed written into the problem file
        #[arg(long)]
        seed: Option<u64>,

        /// Seed for convex-hull subsampling
        #[arg(long)]
        subsample_seed: Option<u64>,
    },

    /// Run a complete OUU optimization
    Run {
        /// Problem description (JSON)
        #[arg(value_name = "PROBLEM")]
        problem: PathBuf,

        /// Seed written into the problem file
        #[arg(long)]
        seed: Option<u64>,

        /// Seed for convex-hull subsampling
        #[arg(long)]
        subsample_seed: Option<u64>,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Seconds a cancelled engine gets before it is killed
        #[arg(long, default_value = "5")]
        grace: u64,

        /// Echo raw engine output on stderr
        #[arg(short, long)]
        verbose: bool,

        /// Print the result as JSON instead of the report text
        #[arg(long)]
        json: bool,
    },

    /// Reduce a discrete uncertainty sample by histogram binning
    Compress {
        /// Sample file (`<N> <nInputs>` header)
        #[arg(value_name = "SAMPLE")]
        sample: PathBuf,

        /// Report the largest scenario set not exceeding this size
        #[arg(long, value_name = "N")]
        target: Option<usize>,
    },

    /// Pick representative points from a sample by convex-hull coverage
    Subsample {
        /// Sample file (`<N> <nInputs>` header)
        #[arg(value_name = "SAMPLE")]
        sample: PathBuf,

        /// Number of points to keep
        #[arg(short = 'n', long)]
        count: usize,

        /// Output sample file
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ouuc=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            problem,
            seed,
            subsample_seed,
        } => {
            let mut config = OuuConfig::new(EngineConfig::new(
                cli.psuade.unwrap_or_else(|| PathBuf::from("psuade")),
            ))
            .with_work_dir(cli.work_dir);
            config.random_seed = seed;
            config.subsample_seed = subsample_seed;
            compile_command(problem, config)
        }
        Commands::Run {
            problem,
            seed,
            subsample_seed,
            timeout,
            grace,
            verbose,
            json,
        } => {
            let mut engine = engine_config(cli.psuade)?;
            engine.echo_output = verbose;
            let mut config = OuuConfig::new(engine).with_work_dir(cli.work_dir);
            config.random_seed = seed;
            config.subsample_seed = subsample_seed;
            config.termination_grace = Duration::from_secs(grace);
            run_command(problem, config, timeout.map(Duration::from_secs), json)
        }
        Commands::Compress { sample, target } => {
            compress_command(cli.psuade, sample, cli.work_dir, target)
        }
        Commands::Subsample {
            sample,
            count,
            output,
            seed,
        } => subsample_command(sample, count, output, seed),
    }
}

fn engine_config(explicit: Option<PathBuf>) -> Result<EngineConfig> {
    match explicit {
        Some(path) => Ok(EngineConfig::new(path)),
        None => EngineConfig::detect().context("Failed to locate the PSUADE engine"),
    }
}

fn load_problem(path: &Path) -> Result<OuuProblem> {
    OuuProblem::load(path)
        .with_context(|| format!("Failed to load problem description: {}", path.display()))
}

fn compile_command(problem: PathBuf, config: OuuConfig) -> Result<()> {
    let problem = load_problem(&problem)?;
    let compiled = compile(&problem, &config).context("Compilation failed")?;

    let script_path = compiled.work_dir.join(format!("{}.script", problem.name));
    std::fs::write(&script_path, render_script(&compiled.script))
        .with_context(|| format!("Failed to write script: {}", script_path.display()))?;

    for v in problem.active_variables() {
        eprintln!("  {:<16} {}", v.name, v.role.label());
    }
    let p = &compiled.partition;
    eprintln!(
        "Partition: {} design, {} recourse, {} discrete UQ, {} continuous UQ",
        p.m1, p.m2, p.m3, p.m4
    );
    println!("{}", compiled.problem_file.display());
    println!("{}", script_path.display());
    Ok(())
}

fn run_command(
    problem: PathBuf,
    config: OuuConfig,
    timeout: Option<Duration>,
    json: bool,
) -> Result<()> {
    let problem = load_problem(&problem)?;
    let mut job = OuuJob::start(&problem, config).context("Failed to start OUU job")?;
    let started = Instant::now();
    let poll = Duration::from_millis(200);

    let outcome = loop {
        if let Some(events) = job.events() {
            for event in events.try_iter() {
                if let EngineEvent::Progress(p) = event {
                    eprintln!(
                        "iteration {:>4}  eval {:>6}  objective {:.6e}  x = {:?}",
                        p.iteration, p.eval_index, p.objective, p.inputs
                    );
                }
            }
        }

        if timeout.is_some_and(|limit| started.elapsed() >= limit) {
            eprintln!("Timeout reached, cancelling");
            break job.cancel_and_wait()?;
        }
        if let Some(outcome) = job.wait_timeout(poll) {
            break outcome.map_err(|e| {
                if let ouuc::OuuError::Engine(engine) = &e {
                    if let Some(text) = engine.captured_output() {
                        eprintln!("{}", text);
                    }
                }
                e
            })?;
        }
    };

    match outcome {
        JobOutcome::Finished(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.report_text);
            }
            Ok(())
        }
        JobOutcome::Cancelled { .. } => bail!("OUU run cancelled before completion"),
    }
}

fn compress_command(
    psuade: Option<PathBuf>,
    sample: PathBuf,
    work_dir: PathBuf,
    target: Option<usize>,
) -> Result<()> {
    let engine = PsuadeEngine::new(engine_config(psuade)?);
    let set = compress(&engine, &sample, &work_dir)
        .with_context(|| format!("Scenario compression failed for {}", sample.display()))?;

    println!("{:>10}  {:>5}  file", "scenarios", "bins");
    for (n, file) in set.iter() {
        let bins = file
            .bins
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>10}  {:>5}  {}", n, bins, file.path.display());
    }
    if let Some((n, file)) = target.and_then(|t| set.closest_below(t)) {
        eprintln!("Selected {} scenarios: {}", n, file.path.display());
    }
    Ok(())
}

fn subsample_command(
    sample: PathBuf,
    count: usize,
    output: PathBuf,
    seed: Option<u64>,
) -> Result<()> {
    let file = SampleFile::read(&sample)
        .with_context(|| format!("Failed to read sample: {}", sample.display()))?;
    let points = file.inputs();

    let mut sampler = match seed {
        Some(seed) => Subsampler::with_seed(seed),
        None => Subsampler::new(),
    };
    let chosen = sampler.subsample(&points, count)?;
    write_sample(&output, file.header.n_inputs, &chosen)?;
    eprintln!(
        "Selected {} of {} points -> {}",
        chosen.len(),
        points.len(),
        output.display()
    );
    Ok(())
}
