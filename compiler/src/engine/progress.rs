//! Optimization progress scraped from the engine's output stream

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One evaluated point of the outer optimization loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OuuProgress {
    /// Outer optimization iteration
    pub iteration: usize,
    /// Design variable values of the current iterate
    pub inputs: Vec<f64>,
    /// Function evaluation counter reported by the engine
    pub eval_index: usize,
    pub objective: f64,
}

/// Line-by-line state machine producing [`OuuProgress`] events
///
/// An iteration header opens the input list, input lines fill it, an
/// evaluation header closes it, and the matching objective line completes
/// one event. Several evaluations may share one iterate.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    iteration_re: Regex,
    input_re: Regex,
    eval_re: Regex,
    objective_re: Regex,
    iteration: usize,
    inputs: Vec<f64>,
    grabbing_inputs: bool,
    pending_eval: Option<usize>,
}

impl ProgressTracker {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            iteration_re: Regex::new(r"Outer optimization iteration = ([0-9]*)")?,
            input_re: Regex::new(r"Current Level 1 input \s*[0-9]* = (.*)")?,
            eval_re: Regex::new(r"computing objective .* nFuncEval = (.*)")?,
            objective_re: Regex::new(r"computed  objective .* = (.*)\.")?,
            iteration: 0,
            inputs: Vec::new(),
            grabbing_inputs: false,
            pending_eval: None,
        })
    }

    /// Feed one output line; returns an event when an evaluation completes
    pub fn observe(&mut self, line: &str) -> Option<OuuProgress> {
        if self.pending_eval.is_none() {
            if let Some(k) = capture(&self.iteration_re, line) {
                self.iteration = k.parse().unwrap_or(self.iteration);
                self.inputs.clear();
                self.grabbing_inputs = true;
                return None;
            }
        }

        if self.grabbing_inputs {
            if let Some(v) = capture(&self.input_re, line) {
                if let Ok(v) = v.parse() {
                    self.inputs.push(v);
                }
                return None;
            }
        }

        if let Some(n) = capture(&self.eval_re, line) {
            self.grabbing_inputs = false;
            self.pending_eval = n.parse().ok();
            return None;
        }

        let eval_index = self.pending_eval?;
        let objective = capture(&self.objective_re, line)?.parse().ok()?;
        self.pending_eval = None;
        Some(OuuProgress {
            iteration: self.iteration,
            inputs: self.inputs.clone(),
            eval_index,
            objective,
        })
    }
}

fn capture<'t>(re: &Regex, line: &'t str) -> Option<&'t str> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_emits_per_evaluation() {
        let mut tracker = ProgressTracker::new().unwrap();
        let lines = [
            "OUU: Outer optimization iteration = 3",
            "OUU: Current Level 1 input   1 = 1.5e+00",
            "OUU: Current Level 1 input   2 = -2.0e-01",
            "OUU: computing objective (no RS), nFuncEval = 7",
            "some unrelated chatter",
            "OUU: computed  objective (with UQ) = 4.250000e+00.",
            "OUU: computing objective (no RS), nFuncEval = 8",
            "OUU: computed  objective (with UQ) = 4.000000e+00.",
        ];
        let events: Vec<OuuProgress> = lines.iter().filter_map(|l| tracker.observe(l)).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].iteration, 3);
        assert_eq!(events[0].inputs, vec![1.5, -0.2]);
        assert_eq!(events[0].eval_index, 7);
        assert_eq!(events[0].objective, 4.25);
        assert_eq!(events[1].eval_index, 8);
        assert_eq!(events[1].inputs, vec![1.5, -0.2]);
    }

    #[test]
    fn test_objective_without_evaluation_is_ignored() {
        let mut tracker = ProgressTracker::new().unwrap();
        assert!(tracker
            .observe("OUU: computed  objective (with UQ) = 1.0.")
            .is_none());
    }

    #[test]
    fn test_new_iteration_resets_inputs() {
        let mut tracker = ProgressTracker::new().unwrap();
        tracker.observe("Outer optimization iteration = 1");
        tracker.observe("Current Level 1 input 1 = 1.0");
        tracker.observe("Outer optimization iteration = 2");
        tracker.observe("Current Level 1 input 1 = 2.0");
        tracker.observe("computing objective , nFuncEval = 5");
        let ev = tracker
            .observe("computed  objective (with UQ) = 9.5.")
            .unwrap();
        assert_eq!(ev.iteration, 2);
        assert_eq!(ev.inputs, vec![2.0]);
    }
}
