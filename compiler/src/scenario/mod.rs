//! Scenario reduction for discrete uncertainty samples
//!
//! A large weighted Z3 sample is compressed by histogram binning: the
//! engine bins every input into `b` bins and emits one weighted scenario per
//! occupied cell. Growing `b` grows the scenario count; [`compress`] records
//! every size reached and leaves the choice to the caller.
//!
//! [`subsample`] picks representative points for response-surface training.

pub mod hull;
pub mod subsample;

pub use subsample::{subsample, Subsampler};

use crate::engine::Engine;
use crate::error::{EngineError, OuuError};
use crate::samples::read_header;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Smallest sample the histogram generator accepts
pub const MIN_SCENARIO_SAMPLES: usize = 100;
/// Bin counts tried are `2..MAX_BINS`
pub const MAX_BINS: u32 = 20;
/// Scenario count beyond which growing stops
pub const MAX_SCENARIOS: usize = 1501;
/// File the engine writes its histogram sample to
pub const HISTOGRAM_SAMPLE_FILE: &str = "psuade_pdfhist_sample";

/// One compressed scenario file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioFile {
    pub path: PathBuf,
    /// Bins per input; `None` for the uncompressed original
    pub bins: Option<u32>,
}

/// Achievable scenario counts and their files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioSet {
    files: BTreeMap<usize, ScenarioFile>,
    visited: Vec<usize>,
}

impl ScenarioSet {
    fn insert(&mut self, n_scenarios: usize, file: ScenarioFile) {
        if self.files.insert(n_scenarios, file).is_none() {
            self.visited.push(n_scenarios);
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, n_scenarios: usize) -> Option<&ScenarioFile> {
        self.files.get(&n_scenarios)
    }

    /// Entries by increasing scenario count
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ScenarioFile)> {
        self.files.iter().map(|(n, f)| (*n, f))
    }

    /// Scenario counts in the order they were produced
    pub fn visited(&self) -> &[usize] {
        &self.visited
    }

    /// Entry with the largest count not exceeding `target`, else the smallest
    pub fn closest_below(&self, target: usize) -> Option<(usize, &ScenarioFile)> {
        self.files
            .range(..=target)
            .next_back()
            .or_else(|| self.files.iter().next())
            .map(|(n, f)| (*n, f))
    }
}

/// Script asking the engine for a histogram sample with `bins` per input
pub fn histogram_script(sample_file: &Path, n_inputs: usize, bins: u32) -> Vec<String> {
    let mut script = vec![
        format!("read_std {}", sample_file.display()),
        "genhistogram".to_string(),
    ];
    script.extend((0..n_inputs).map(|_| bins.to_string()));
    script.push("quit".to_string());
    script
}

/// Compress a discrete uncertainty sample into candidate scenario files
///
/// Compressed files are archived in `work_dir` as
/// `<stem>.compressed<Ns>`. Samples smaller than [`MIN_SCENARIO_SAMPLES`]
/// come back unchanged as the only entry. Any engine failure aborts the
/// whole reduction.
pub fn compress(
    engine: &dyn Engine,
    sample_file: &Path,
    work_dir: &Path,
) -> Result<ScenarioSet, OuuError> {
    let header = read_header(sample_file)?;
    let n = header.n_samples;
    let mut set = ScenarioSet::default();

    if n < MIN_SCENARIO_SAMPLES {
        warn!(
            samples = n,
            minimum = MIN_SCENARIO_SAMPLES,
            "sample too small for scenario compression, using it as is"
        );
        set.insert(
            n,
            ScenarioFile {
                path: sample_file.to_path_buf(),
                bins: None,
            },
        );
        return Ok(set);
    }

    fs::create_dir_all(work_dir)?;
    let source = std::path::absolute(sample_file)?;
    let stem = sample_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scenarios".to_string());
    let limit = n.min(MAX_SCENARIOS);

    for bins in 2..MAX_BINS {
        let script = histogram_script(&source, header.n_inputs, bins);
        engine.run_script(&script, work_dir)?;

        let produced = work_dir.join(HISTOGRAM_SAMPLE_FILE);
        if !produced.exists() {
            return Err(EngineError::MissingArtifact(produced).into());
        }
        let n_scenarios = read_header(&produced)?.n_samples;
        let archived = work_dir.join(format!("{}.compressed{}", stem, n_scenarios));
        if archived.exists() {
            fs::remove_file(&archived)?;
        }
        fs::rename(&produced, &archived)?;
        debug!(bins, n_scenarios, path = %archived.display(), "histogram sample archived");

        if set.len() > 1 && n_scenarios > limit {
            info!(bins, n_scenarios, limit, "scenario count overshot, stopping");
            break;
        }
        set.insert(
            n_scenarios,
            ScenarioFile {
                path: archived,
                bins: Some(bins),
            },
        );
    }

    info!(sizes = ?set.visited(), "scenario compression finished");
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_script_repeats_bins_per_input() {
        let script = histogram_script(Path::new("/data/z3.smp"), 3, 5);
        assert_eq!(
            script,
            vec!["read_std /data/z3.smp", "genhistogram", "5", "5", "5", "quit"]
        );
    }

    #[test]
    fn test_closest_below() {
        let mut set = ScenarioSet::default();
        for (n, b) in [(4, 2), (9, 3), (16, 4)] {
            set.insert(
                n,
                ScenarioFile {
                    path: PathBuf::from(format!("s.compressed{}", n)),
                    bins: Some(b),
                },
            );
        }
        assert_eq!(set.closest_below(10).map(|(n, _)| n), Some(9));
        assert_eq!(set.closest_below(2).map(|(n, _)| n), Some(4));
        assert_eq!(set.visited(), &[4, 9, 16]);
    }
}
