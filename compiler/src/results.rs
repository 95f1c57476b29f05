//! Optimization results from captured engine output
//!
//! The engine reports its outcome as free text. Everything that depends on
//! that text lives behind [`ResultParser`] so a different engine version
//! can be supported by swapping the parser.

use crate::error::EngineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parsed outcome of a finished OUU run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Best objective value, when the report states one
    pub best_value: Option<f64>,
    /// Design variable values at the optimum, in input order
    pub best_inputs: Vec<f64>,
    /// Total function evaluations reported by the engine
    pub eval_count: usize,
    /// Human-readable result block
    pub report_text: String,
}

pub trait ResultParser: Send + Sync {
    /// Fails with [`EngineError::NoResultMarker`] when the run did not finish
    fn parse(&self, output: &str) -> Result<OptimizationResult, EngineError>;
}

/// Parser for the stock PSUADE report format
#[derive(Debug, Clone)]
pub struct PsuadeResultParser {
    count_re: Regex,
    input_re: Regex,
    ymin_re: Regex,
}

impl PsuadeResultParser {
    /// Line prefix carrying the evaluation count
    pub const MARKER: &'static str = "OUU total number of function evaluations = ";
    /// Generic banner replaced in the report block
    pub const BANNER: &'static str = "PSUADE OPTIMIZATION : CURRENT GLOBAL MINIMUM -";

    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            count_re: Regex::new(&format!("{}(.*)", regex::escape(Self::MARKER)))?,
            input_re: Regex::new(r"X\s+(\d+)\s*=\s*(\S+)")?,
            ymin_re: Regex::new(r"Ymin\s*=\s*(\S+)")?,
        })
    }

    pub fn eval_count(&self, output: &str) -> Option<usize> {
        let caps = self.count_re.captures(output)?;
        caps.get(1)?.as_str().trim().parse().ok()
    }

    /// Text between the first and last `#`, banner rewritten
    pub fn report_block(&self, output: &str, eval_count: usize) -> String {
        let block = match (output.find('#'), output.rfind('#')) {
            (Some(i), Some(j)) if i < j => &output[i..j],
            _ => "",
        };
        block.replace(
            Self::BANNER,
            &format!("OPTIMIZATION RESULTS (after {} function evaluations)", eval_count),
        )
    }

    fn best_point(&self, block: &str) -> (Option<f64>, Vec<f64>) {
        let mut inputs = BTreeMap::new();
        for caps in self.input_re.captures_iter(block) {
            if let (Ok(i), Ok(v)) = (caps[1].parse::<usize>(), caps[2].parse::<f64>()) {
                inputs.insert(i, v);
            }
        }
        let best = self
            .ymin_re
            .captures_iter(block)
            .filter_map(|c| c[1].parse::<f64>().ok())
            .last();
        (best, inputs.into_values().collect())
    }
}

impl ResultParser for PsuadeResultParser {
    fn parse(&self, output: &str) -> Result<OptimizationResult, EngineError> {
        let eval_count = self
            .eval_count(output)
            .ok_or_else(|| EngineError::NoResultMarker {
                output: output.to_string(),
            })?;
        let report_text = self.report_block(output, eval_count);
        let (best_value, best_inputs) = self.best_point(&report_text);

        Ok(OptimizationResult {
            best_value,
            best_inputs,
            eval_count,
            report_text,
        })
    }
}
