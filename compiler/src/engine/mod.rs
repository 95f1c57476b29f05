//! PSUADE engine discovery and invocation
//!
//! This module provides:
//! - Detection of the `psuade` executable
//! - The [`Engine`] seam used by one-shot invocations (scenario compression)
//! - A background driver for long OUU runs (see [`worker`])
//! - Progress extraction from the engine's output (see [`progress`])

pub mod progress;
pub mod worker;

pub use progress::{OuuProgress, ProgressTracker};
pub use worker::{EngineDriver, EngineEvent, EngineRun};

use crate::codegen::render_script;
use crate::error::EngineError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

/// Environment variable naming the engine executable
pub const PSUADE_ENV: &str = "PSUADE";

/// How to launch the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub executable: PathBuf,
    /// Mirror engine output on stderr while it runs
    pub echo_output: bool,
}

impl EngineConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            echo_output: false,
        }
    }

    /// Locate the engine with [`detect_psuade`]
    pub fn detect() -> Result<Self, EngineError> {
        Ok(Self::new(detect_psuade()?))
    }

    /// Start the engine in `workdir` with all three standard streams piped
    ///
    /// On unix the engine leads its own process group, so driver processes
    /// it launches can be killed with it.
    pub fn spawn(&self, workdir: &Path) -> Result<Child, EngineError> {
        let mut command = Command::new(&self.executable);
        command
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
            .spawn()
            .map_err(|source| EngineError::Spawn {
                executable: self.executable.clone(),
                source,
            })
    }
}

/// Detect the engine executable
///
/// Looks at `$PSUADE`, then common install locations, then `PATH`.
pub fn detect_psuade() -> Result<PathBuf, EngineError> {
    if let Ok(path) = std::env::var(PSUADE_ENV) {
        let exe = PathBuf::from(&path);
        if exe.is_file() {
            return Ok(exe);
        }
        tracing::warn!(path = %path, "{} does not point to a file", PSUADE_ENV);
    }

    let mut common_paths = vec![
        PathBuf::from("/usr/local/bin/psuade"),
        PathBuf::from("/usr/bin/psuade"),
        PathBuf::from("/opt/psuade/bin/psuade"),
    ];
    if let Ok(home) = std::env::var("HOME") {
        common_paths.push(PathBuf::from(format!("{}/.local/bin/psuade", home)));
        common_paths.push(PathBuf::from(format!("{}/psuade/bin/psuade", home)));
    }
    if let Some(exe) = common_paths.into_iter().find(|p| p.is_file()) {
        return Ok(exe);
    }

    if let Some(path) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path) {
            let exe = dir.join("psuade");
            if exe.is_file() {
                return Ok(exe);
            }
        }
    }

    Err(EngineError::NotFound(format!(
        "set the {} environment variable or put psuade on PATH",
        PSUADE_ENV
    )))
}

/// Text captured from one engine invocation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineOutput {
    /// Everything written to stdout
    pub output: String,
    /// Everything written to stderr
    pub error_text: String,
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub success: bool,
}

impl EngineOutput {
    pub(crate) fn from_parts(output: String, error_text: String, status: ExitStatus) -> Self {
        Self {
            output,
            error_text,
            status: status.code(),
            success: status.success(),
        }
    }

    /// Turn an unsuccessful exit into [`EngineError::NonZeroExit`]
    pub fn into_result(self) -> Result<Self, EngineError> {
        if self.success {
            return Ok(self);
        }
        let status = match self.status {
            Some(code) => format!("exit code {}", code),
            None => "signal".to_string(),
        };
        Err(EngineError::NonZeroExit {
            status,
            stderr: self.error_text,
            output: self.output,
        })
    }
}

/// Anything that can run a command script to completion
///
/// The subprocess engine is the production implementation; tests substitute
/// fakes that emulate the engine's file side effects.
pub trait Engine: Send + Sync {
    fn run_script(&self, script: &[String], workdir: &Path) -> Result<EngineOutput, EngineError>;
}

/// Blocking subprocess engine
#[derive(Debug, Clone)]
pub struct PsuadeEngine {
    config: EngineConfig,
}

impl PsuadeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Engine for PsuadeEngine {
    fn run_script(&self, script: &[String], workdir: &Path) -> Result<EngineOutput, EngineError> {
        let mut child = self.config.spawn(workdir)?;
        let writer = feed_stdin(&mut child, render_script(script));

        let out = child.wait_with_output()?;
        if writer.join().is_err() {
            tracing::warn!("stdin writer thread panicked");
        }

        let output = EngineOutput::from_parts(
            String::from_utf8_lossy(&out.stdout).into_owned(),
            String::from_utf8_lossy(&out.stderr).into_owned(),
            out.status,
        );
        if !output.error_text.is_empty() {
            tracing::warn!(stderr = %output.error_text.trim_end(), "engine wrote to stderr");
        }
        output.into_result()
    }
}

/// Write the script on its own thread so a chatty engine cannot block us
pub(crate) fn feed_stdin(child: &mut Child, text: String) -> thread::JoinHandle<()> {
    let stdin = child.stdin.take();
    thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            // broken pipe just means the engine stopped reading early
            if let Err(e) = stdin.write_all(text.as_bytes()) {
                tracing::debug!(error = %e, "engine closed stdin early");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_exit_becomes_error() {
        let out = EngineOutput {
            output: "partial".into(),
            error_text: "boom".into(),
            status: Some(2),
            success: false,
        };
        match out.into_result() {
            Err(EngineError::NonZeroExit {
                status,
                stderr,
                output,
            }) => {
                assert_eq!(status, "exit code 2");
                assert_eq!(stderr, "boom");
                assert_eq!(output, "partial");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_successful_exit_passes_through() {
        let out = EngineOutput {
            success: true,
            status: Some(0),
            ..Default::default()
        };
        assert!(out.into_result().is_ok());
    }

    #[test]
    fn test_missing_executable_fails_to_spawn() {
        let config = EngineConfig::new("/nonexistent/psuade-binary");
        let dir = std::env::temp_dir();
        assert!(matches!(
            config.spawn(&dir),
            Err(EngineError::Spawn { .. })
        ));
    }
}
