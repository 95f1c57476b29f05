//! OUU job orchestration
//!
//! A job takes an [`OuuProblem`] through the whole pipeline:
//! - validate drivers, partition the variables and check sample sources
//! - compile the command script
//! - prepare the scratch directory and clear stale stop/history files
//! - materialise inline samples and the convex-hull training subsample
//! - write the problem file
//! - run the engine on a background worker and parse the result
//!
//! Everything up to the engine launch happens synchronously in
//! [`OuuJob::start`], so validation errors surface before any process exists.

use crate::codegen::script::clamp_training_size;
use crate::codegen::{
    ContinuousInput, ProblemFileWriter, ResponseSurfaceInput, ScriptCompiler, TrainingPoints,
};
use crate::engine::{EngineConfig, EngineDriver, EngineEvent, EngineOutput, EngineRun};
use crate::error::{EngineError, OuuError, ValidationError};
use crate::partition::{partition, Partition};
use crate::problem::{
    ContinuousSample, DiscreteSample, OuuProblem, ResponseSurface, RsSubsample, SamplingScheme,
};
use crate::results::{OptimizationResult, PsuadeResultParser, ResultParser};
use crate::samples::{read_header, write_sample, SampleFile, SampleHeader};
use crate::scenario::Subsampler;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

pub const DEFAULT_WORK_DIR: &str = "OUU_files";
pub const STOP_FILE_NAME: &str = "psuade_ouu_stop";
pub const HISTORY_FILE_NAME: &str = "psuade_ouu_history";
pub const OUTPUT_FILE_NAME: &str = "ouu.out";
/// Engine scratch files removed after every run contain this fragment
pub const ENGINE_SCRATCH_MARKER: &str = "psuadeOpt";

/// Per-job settings
#[derive(Debug, Clone)]
pub struct OuuConfig {
    /// Scratch directory; the engine runs with this as its working directory
    pub work_dir: PathBuf,
    pub stop_file_name: String,
    pub history_file_name: String,
    pub engine: EngineConfig,
    /// Written into the METHOD block
    pub random_seed: Option<u64>,
    /// Seed for convex-hull subsampling; entropy when unset
    pub subsample_seed: Option<u64>,
    /// Keep the captured engine text as `ouu.out`
    pub save_output: bool,
    /// How long a cancelled engine may take to notice the stop file
    pub termination_grace: Duration,
}

impl OuuConfig {
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            stop_file_name: STOP_FILE_NAME.to_string(),
            history_file_name: HISTORY_FILE_NAME.to_string(),
            engine,
            random_seed: None,
            subsample_seed: None,
            save_output: true,
            termination_grace: Duration::from_secs(5),
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn stop_file(&self) -> PathBuf {
        self.work_dir.join(&self.stop_file_name)
    }

    pub fn history_file(&self) -> PathBuf {
        self.work_dir.join(&self.history_file_name)
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Files and script prepared for one engine run
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledJob {
    pub work_dir: PathBuf,
    pub problem_file: PathBuf,
    pub partition: Partition,
    pub script: Vec<String>,
}

/// Validate `problem` and write everything the engine needs into the
/// scratch directory
///
/// All validation, including sample files and the script itself, happens
/// before the scratch directory is created or stale files are removed.
pub fn compile(problem: &OuuProblem, config: &OuuConfig) -> Result<CompiledJob, OuuError> {
    if !problem.drivers.has_optimizer_driver() {
        return Err(ValidationError::NoDrivers.into());
    }
    let partition = partition(&problem.variables)?;
    let writer = ProblemFileWriter::new(problem).random_seed(config.random_seed);
    let problem_text = writer.render()?;

    let work_dir = std::path::absolute(&config.work_dir)?;
    let plan = SamplePlan::new(problem, &partition, &work_dir)?;
    let problem_file = work_dir.join(format!("{}.ouudat", problem.name));

    let mut compiler = ScriptCompiler::new(&problem_file, &partition);
    compiler.aggregation = problem.aggregation;
    compiler.has_constraints = problem.has_constraints();
    compiler.discrete_file = plan.discrete.as_ref().map(|s| s.path.clone());
    compiler.continuous = plan.continuous_input();
    compiler.response_surface = plan.response_surface.clone();
    compiler.mode = problem.mode;
    compiler.ensemble_driver = problem.drivers.ensemble_opt_driver.is_some();
    let script = compiler.compile()?;
    debug!(lines = script.len(), shape = ?compiler.shape(), "compiled script");

    fs::create_dir_all(&work_dir)?;
    for name in [&config.stop_file_name, &config.history_file_name] {
        let stale = work_dir.join(name);
        if stale.exists() {
            debug!(path = %stale.display(), "removing stale file");
            fs::remove_file(&stale)?;
        }
    }

    plan.materialise(&partition, config.subsample_seed)?;
    fs::write(&problem_file, problem_text)?;
    info!(path = %problem_file.display(), "wrote problem file");

    Ok(CompiledJob {
        work_dir,
        problem_file,
        partition,
        script,
    })
}

/// A sample the engine reads from disk
#[derive(Debug)]
struct SampleSource<'p> {
    path: PathBuf,
    n_samples: usize,
    /// Inline rows still to be written to `path`
    inline: Option<&'p [Vec<f64>]>,
}

#[derive(Debug)]
enum ContinuousPlan<'p> {
    File(SampleSource<'p>),
    Generate(SamplingScheme),
}

/// Checked sample sources and the files derived from them
#[derive(Debug)]
struct SamplePlan<'p> {
    discrete: Option<SampleSource<'p>>,
    continuous: Option<ContinuousPlan<'p>>,
    response_surface: Option<ResponseSurfaceInput>,
    /// Convex-hull training file and its size
    hull: Option<(PathBuf, usize)>,
}

impl<'p> SamplePlan<'p> {
    /// Check every sample source against the partition without writing
    fn new(
        problem: &'p OuuProblem,
        partition: &Partition,
        work_dir: &Path,
    ) -> Result<Self, OuuError> {
        let discrete = plan_discrete(problem, partition.m3, work_dir)?;
        let continuous = plan_continuous(problem, partition.m4, work_dir)?;
        let mut plan = SamplePlan {
            discrete,
            continuous,
            response_surface: None,
            hull: None,
        };
        if let Some(rs) = problem.response_surface {
            plan.plan_response_surface(rs, partition.m4, work_dir, &problem.name)?;
        }
        Ok(plan)
    }

    fn continuous_input(&self) -> Option<ContinuousInput> {
        self.continuous.as_ref().map(|c| match c {
            ContinuousPlan::File(source) => ContinuousInput::File {
                path: source.path.clone(),
                n_samples: source.n_samples,
            },
            ContinuousPlan::Generate(design) => ContinuousInput::Generate(*design),
        })
    }

    fn plan_response_surface(
        &mut self,
        rs: ResponseSurface,
        m4: usize,
        work_dir: &Path,
        name: &str,
    ) -> Result<(), ValidationError> {
        let mut input = ResponseSurfaceInput {
            training_size: rs.training_size,
            points: TrainingPoints::Random,
        };
        if let (Some(ContinuousPlan::File(source)), RsSubsample::ConvexHull) =
            (&self.continuous, rs.subsample)
        {
            let requested = rs
                .training_size
                .ok_or(ValidationError::MissingResponseSurfaceSize)?;
            if source.n_samples < m4 + 1 {
                return Err(ValidationError::InsufficientSamples {
                    kind: "Z4",
                    required: m4 + 1,
                    found: source.n_samples,
                });
            }
            let stem = source
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string());
            let sub_path = work_dir.join(format!("{}.subsample", stem));
            let n_rs = clamp_training_size(requested, m4, source.n_samples);
            input.points = TrainingPoints::File(sub_path.clone());
            self.hull = Some((sub_path, n_rs));
        }
        self.response_surface = Some(input);
        Ok(())
    }

    /// Write inline samples and the convex-hull subsample
    fn materialise(&self, partition: &Partition, seed: Option<u64>) -> Result<(), OuuError> {
        if let Some(SampleSource {
            path,
            inline: Some(rows),
            ..
        }) = &self.discrete
        {
            write_sample(path, partition.m3, rows)?;
        }
        let Some(ContinuousPlan::File(source)) = &self.continuous else {
            return Ok(());
        };
        if let Some(rows) = source.inline {
            write_sample(&source.path, partition.m4, rows)?;
        }

        if let Some((sub_path, n_rs)) = &self.hull {
            let cloud = match source.inline {
                Some(rows) => rows.to_vec(),
                None => SampleFile::read(&source.path)?.inputs(),
            };
            let mut sampler = match seed {
                Some(seed) => Subsampler::with_seed(seed),
                None => Subsampler::new(),
            };
            let chosen = sampler.subsample(&cloud, *n_rs)?;
            write_sample(sub_path, partition.m4, &chosen)?;
            info!(path = %sub_path.display(), points = chosen.len(), "wrote convex-hull subsample");
        }
        Ok(())
    }
}

fn plan_discrete<'p>(
    problem: &'p OuuProblem,
    m3: usize,
    work_dir: &Path,
) -> Result<Option<SampleSource<'p>>, OuuError> {
    if m3 == 0 {
        return Ok(None);
    }
    match &problem.discrete_sample {
        None => Err(ValidationError::MissingSample("Z3").into()),
        Some(DiscreteSample::File { path }) => {
            let header = sample_header("Z3", path)?;
            check_columns("Z3", m3, header.n_inputs)?;
            Ok(Some(SampleSource {
                path: std::path::absolute(path)?,
                n_samples: header.n_samples,
                inline: None,
            }))
        }
        Some(DiscreteSample::Inline { rows }) => {
            // inputs plus a trailing probability
            if let Some(bad) = rows.iter().find(|r| r.len() != m3 + 1) {
                return Err(ValidationError::SampleDimensionMismatch {
                    kind: "Z3",
                    expected: m3,
                    found: bad.len().saturating_sub(1),
                }
                .into());
            }
            Ok(Some(SampleSource {
                path: work_dir.join(format!("{}_z3.smp", problem.name)),
                n_samples: rows.len(),
                inline: Some(rows),
            }))
        }
    }
}

fn plan_continuous<'p>(
    problem: &'p OuuProblem,
    m4: usize,
    work_dir: &Path,
) -> Result<Option<ContinuousPlan<'p>>, OuuError> {
    if m4 == 0 {
        return Ok(None);
    }
    match &problem.continuous_sample {
        None => Err(ValidationError::MissingSample("Z4").into()),
        Some(ContinuousSample::File { path }) => {
            let header = sample_header("Z4", path)?;
            check_columns("Z4", m4, header.n_inputs)?;
            Ok(Some(ContinuousPlan::File(SampleSource {
                path: std::path::absolute(path)?,
                n_samples: header.n_samples,
                inline: None,
            })))
        }
        Some(ContinuousSample::Inline { rows }) => {
            if let Some(bad) = rows.iter().find(|r| r.len() != m4) {
                return Err(ValidationError::SampleDimensionMismatch {
                    kind: "Z4",
                    expected: m4,
                    found: bad.len(),
                }
                .into());
            }
            Ok(Some(ContinuousPlan::File(SampleSource {
                path: work_dir.join(format!("{}_z4.smp", problem.name)),
                n_samples: rows.len(),
                inline: Some(rows),
            })))
        }
        Some(ContinuousSample::Generate { design }) => Ok(Some(ContinuousPlan::Generate(*design))),
    }
}

/// Header of a user-supplied sample; an unreadable file is a problem error
fn sample_header(kind: &'static str, path: &Path) -> Result<SampleHeader, OuuError> {
    match read_header(path) {
        Err(OuuError::Io(e)) => Err(ValidationError::UnreadableSampleFile {
            kind,
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
        .into()),
        other => other,
    }
}

fn check_columns(kind: &'static str, expected: usize, found: usize) -> Result<(), ValidationError> {
    if expected != found {
        return Err(ValidationError::SampleDimensionMismatch {
            kind,
            expected,
            found,
        });
    }
    Ok(())
}

// =============================================================================
// Jobs
// =============================================================================

/// How a job ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished(OptimizationResult),
    /// Stopped on request; no result is parsed
    Cancelled { output: String },
}

/// One running OUU optimization
pub struct OuuJob {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: OuuConfig,
    compiled: CompiledJob,
    run: Option<EngineRun>,
    parser: Box<dyn ResultParser>,
    cancelled: bool,
}

impl std::fmt::Debug for OuuJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OuuJob")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("problem_file", &self.compiled.problem_file)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl OuuJob {
    /// Compile `problem` and launch the engine with the default parser
    pub fn start(problem: &OuuProblem, config: OuuConfig) -> Result<Self, OuuError> {
        let parser = PsuadeResultParser::new().map_err(EngineError::from)?;
        Self::start_with_parser(problem, config, Box::new(parser))
    }

    pub fn start_with_parser(
        problem: &OuuProblem,
        config: OuuConfig,
        parser: Box<dyn ResultParser>,
    ) -> Result<Self, OuuError> {
        let compiled = compile(problem, &config)?;
        let driver = EngineDriver::new(config.engine.clone());
        let run = driver.start(&compiled.script, &compiled.work_dir)?;

        let id = Uuid::new_v4();
        info!(job = %id, pid = run.pid(), problem = %problem.name, "OUU job started");
        Ok(Self {
            id,
            started_at: Utc::now(),
            config,
            compiled,
            run: Some(run),
            parser,
            cancelled: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn compiled(&self) -> &CompiledJob {
        &self.compiled
    }

    /// Output lines and progress; `None` after [`OuuJob::wait`]
    pub fn events(&self) -> Option<&Receiver<EngineEvent>> {
        self.run.as_ref().map(|r| r.events())
    }

    pub fn is_finished(&self) -> bool {
        self.run.as_ref().map_or(true, |r| r.is_finished())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Ask the engine to stop by creating the stop file
    pub fn cancel(&mut self) -> Result<(), OuuError> {
        let stop = self.compiled.work_dir.join(&self.config.stop_file_name);
        fs::write(&stop, b"")?;
        self.cancelled = true;
        info!(job = %self.id, path = %stop.display(), "stop requested");
        Ok(())
    }

    /// Kill the engine process outright
    pub fn terminate(&mut self) -> Result<(), OuuError> {
        self.cancelled = true;
        if let Some(run) = &self.run {
            run.terminate()?;
        }
        Ok(())
    }

    /// Block until the engine exits
    pub fn wait(mut self) -> Result<JobOutcome, OuuError> {
        let run = self.run.take().ok_or(EngineError::WorkerDied)?;
        let result = run.wait();
        self.finish(result)
    }

    /// Wait up to `timeout`; `Some` exactly once
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<JobOutcome, OuuError>> {
        let result = self.run.as_mut()?.wait_timeout(timeout)?;
        Some(self.finish(result))
    }

    /// Request a stop, then kill the engine if it outlives the grace period
    pub fn cancel_and_wait(mut self) -> Result<JobOutcome, OuuError> {
        self.cancel()?;
        if let Some(outcome) = self.wait_timeout(self.config.termination_grace) {
            return outcome;
        }
        warn!(job = %self.id, "engine ignored stop file, terminating");
        self.terminate()?;
        self.wait()
    }

    fn finish(
        &mut self,
        result: Result<EngineOutput, EngineError>,
    ) -> Result<JobOutcome, OuuError> {
        self.housekeeping(result.as_ref().ok());
        let elapsed = Utc::now() - self.started_at;

        if self.cancelled {
            info!(job = %self.id, "OUU job cancelled");
            let output = result.map(|o| o.output).unwrap_or_default();
            return Ok(JobOutcome::Cancelled { output });
        }

        let output = result?.into_result()?;
        let parsed = self.parser.parse(&output.output)?;
        info!(
            job = %self.id,
            evals = parsed.eval_count,
            best = ?parsed.best_value,
            seconds = elapsed.num_seconds(),
            "OUU job finished"
        );
        Ok(JobOutcome::Finished(parsed))
    }

    fn housekeeping(&self, output: Option<&EngineOutput>) {
        let dir = &self.compiled.work_dir;
        match fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if entry.file_name().to_string_lossy().contains(ENGINE_SCRATCH_MARKER) {
                        if let Err(e) = fs::remove_file(entry.path()) {
                            warn!(path = %entry.path().display(), error = %e, "could not remove engine scratch file");
                        }
                    }
                }
            }
            Err(e) => warn!(dir = %dir.display(), error = %e, "could not list scratch directory"),
        }

        if let (true, Some(out)) = (self.config.save_output, output) {
            let path = dir.join(OUTPUT_FILE_NAME);
            match fs::write(&path, &out.output) {
                Ok(()) => debug!(path = %path.display(), "saved engine output"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not save engine output"),
            }
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Owner of at most one active job
#[derive(Debug)]
pub struct OuuSession {
    config: OuuConfig,
    active: Option<OuuJob>,
}

impl OuuSession {
    pub fn new(config: OuuConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn config(&self) -> &OuuConfig {
        &self.config
    }

    /// Start a job, terminating the previous one if it is still running
    pub fn start(&mut self, problem: &OuuProblem) -> Result<&mut OuuJob, OuuError> {
        if let Some(mut previous) = self.active.take() {
            if !previous.is_finished() {
                warn!(job = %previous.id(), "terminating previous OUU job");
                previous.terminate()?;
            }
        }
        let job = OuuJob::start(problem, self.config.clone())?;
        Ok(self.active.insert(job))
    }

    pub fn active(&mut self) -> Option<&mut OuuJob> {
        self.active.as_mut()
    }

    /// Hand the active job to the caller, e.g. to wait on it
    pub fn take(&mut self) -> Option<OuuJob> {
        self.active.take()
    }

    pub fn cancel(&mut self) -> Result<(), OuuError> {
        match self.active.as_mut() {
            Some(job) => job.cancel(),
            None => Ok(()),
        }
    }
}
