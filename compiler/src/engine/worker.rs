//! Background engine driver
//!
//! Runs one engine process on a dedicated `psuade-worker` thread. The
//! command script is fed to stdin, stdout is read line by line on its own
//! thread and forwarded as [`EngineEvent`]s, and the final [`EngineOutput`]
//! is delivered on a completion channel exactly once.
//!
//! Termination kills the engine's whole process group. Driver processes
//! that escaped the group may keep the output pipes open; after a
//! termination the readers get [`DRAIN_TIMEOUT`] to finish and are then
//! abandoned with whatever text they collected.

use super::progress::{OuuProgress, ProgressTracker};
use super::{feed_stdin, EngineConfig, EngineOutput};
use crate::codegen::render_script;
use crate::error::EngineError;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long output readers may run on after the engine was terminated
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Streamed while the engine runs
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One line of engine stdout, without its terminator
    Line(String),
    Progress(OuuProgress),
}

/// Starts background engine runs
#[derive(Debug, Clone)]
pub struct EngineDriver {
    config: EngineConfig,
}

impl EngineDriver {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Spawn the engine in `workdir` and hand it `script`
    ///
    /// Spawn failures are returned here; everything after the process exists
    /// is reported through [`EngineRun::wait`].
    pub fn start(&self, script: &[String], workdir: &Path) -> Result<EngineRun, EngineError> {
        let tracker = ProgressTracker::new()?;
        let mut child = self.config.spawn(workdir)?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        // detached: finishes once the script is written or the pipe closes
        let _writer = feed_stdin(&mut child, render_script(script));

        let child = Arc::new(Mutex::new(child));
        let terminated = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = channel();
        let (done_tx, done_rx) = channel();

        let pipes = Pipes {
            stdout,
            stderr,
            echo: self.config.echo_output,
            tracker,
            events: event_tx,
        };
        let worker_child = Arc::clone(&child);
        let worker_terminated = Arc::clone(&terminated);
        let handle = thread::Builder::new()
            .name("psuade-worker".to_string())
            .spawn(move || {
                info!(pid, "engine worker started");
                let result = run_worker(&worker_child, pipes, &worker_terminated);
                match &result {
                    Ok(out) => info!(
                        pid,
                        status = ?out.status,
                        bytes = out.output.len(),
                        "engine exited"
                    ),
                    Err(e) => error!(pid, error = %e, "engine worker failed"),
                }
                let _ = done_tx.send(result);
            })
            .map_err(|e| {
                let _ = lock(&child).kill();
                EngineError::Io(e)
            })?;

        Ok(EngineRun {
            child,
            pid,
            terminated,
            events: event_rx,
            finished: done_rx,
            handle: Some(handle),
            delivered: false,
        })
    }
}

/// Handle to a running engine process
#[derive(Debug)]
pub struct EngineRun {
    child: Arc<Mutex<Child>>,
    pid: u32,
    terminated: Arc<AtomicBool>,
    events: Receiver<EngineEvent>,
    finished: Receiver<Result<EngineOutput, EngineError>>,
    handle: Option<JoinHandle<()>>,
    delivered: bool,
}

impl EngineRun {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.delivered || self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Kill the engine and every process in its group
    ///
    /// A no-op once completion has been delivered.
    pub fn terminate(&self) -> Result<(), EngineError> {
        if self.delivered {
            return Ok(());
        }
        self.terminated.store(true, Ordering::SeqCst);
        info!(pid = self.pid, "terminating engine");
        kill_group(self.pid)?;

        let mut child = lock(&self.child);
        if child.try_wait()?.is_none() {
            child.kill()?;
        }
        Ok(())
    }

    /// Wait up to `timeout` for completion
    ///
    /// Returns `Some` exactly once; later calls return `None`.
    pub fn wait_timeout(
        &mut self,
        timeout: Duration,
    ) -> Option<Result<EngineOutput, EngineError>> {
        if self.delivered {
            return None;
        }
        let result = match self.finished.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::WorkerDied),
        };
        self.finish();
        Some(result)
    }

    /// Block until the engine exits
    pub fn wait(mut self) -> Result<EngineOutput, EngineError> {
        if self.delivered {
            return Err(EngineError::WorkerDied);
        }
        let result = self
            .finished
            .recv()
            .unwrap_or(Err(EngineError::WorkerDied));
        self.finish();
        result
    }

    fn finish(&mut self) {
        self.delivered = true;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(pid = self.pid, "engine worker panicked");
            }
        }
    }
}

impl Drop for EngineRun {
    fn drop(&mut self) {
        if !self.delivered {
            debug!(pid = self.pid, "dropping unfinished engine run");
            if let Err(e) = self.terminate() {
                warn!(pid = self.pid, error = %e, "could not terminate engine");
            }
            self.finish();
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) -> Result<(), EngineError> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        // group already gone
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(EngineError::Io(std::io::Error::from(e))),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) -> Result<(), EngineError> {
    Ok(())
}

/// Engine output streams and where their contents go
struct Pipes {
    stdout: Option<std::process::ChildStdout>,
    stderr: Option<std::process::ChildStderr>,
    echo: bool,
    tracker: ProgressTracker,
    events: Sender<EngineEvent>,
}

fn run_worker(
    child: &Mutex<Child>,
    pipes: Pipes,
    terminated: &AtomicBool,
) -> Result<EngineOutput, EngineError> {
    let output = Arc::new(Mutex::new(String::new()));
    let error_text = Arc::new(Mutex::new(String::new()));

    let Pipes {
        stdout,
        stderr,
        echo,
        mut tracker,
        events,
    } = pipes;

    let stderr_text = Arc::clone(&error_text);
    let stderr_reader = thread::Builder::new()
        .name("psuade-stderr".to_string())
        .spawn(move || {
            if let Some(stderr) = stderr {
                read_lines(stderr, "stderr", |line| lock(&stderr_text).push_str(line));
            }
        })?;

    let stdout_text = Arc::clone(&output);
    let stdout_reader = thread::Builder::new()
        .name("psuade-stdout".to_string())
        .spawn(move || {
            let Some(stdout) = stdout else { return };
            read_lines(stdout, "stdout", |text| {
                lock(&stdout_text).push_str(text);
                let line = text.trim_end_matches(['\r', '\n']);
                if echo {
                    eprintln!("{}", line);
                }
                debug!(target: "ouuc::engine::output", "{}", line);
                let _ = events.send(EngineEvent::Line(line.to_string()));
                if let Some(progress) = tracker.observe(line) {
                    debug!(
                        iteration = progress.iteration,
                        eval = progress.eval_index,
                        objective = progress.objective,
                        "progress"
                    );
                    let _ = events.send(EngineEvent::Progress(progress));
                }
            });
        })?;

    let status = wait_child(child)?;
    join_reader(stdout_reader, terminated);
    join_reader(stderr_reader, terminated);

    let output = std::mem::take(&mut *lock(&output));
    let error_text = std::mem::take(&mut *lock(&error_text));
    Ok(EngineOutput::from_parts(output, error_text, status))
}

/// Feed each newline-terminated chunk of `stream` to `sink`
fn read_lines(stream: impl Read, name: &str, mut sink: impl FnMut(&str)) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => sink(&String::from_utf8_lossy(&buf)),
            Err(e) => {
                warn!(stream = name, error = %e, "reading engine output failed");
                break;
            }
        }
    }
}

/// Join an output reader, giving up after [`DRAIN_TIMEOUT`] once terminated
fn join_reader(handle: JoinHandle<()>, terminated: &AtomicBool) {
    let mut deadline = None;
    while !handle.is_finished() {
        if terminated.load(Ordering::SeqCst) {
            let limit = *deadline.get_or_insert_with(|| Instant::now() + DRAIN_TIMEOUT);
            if Instant::now() >= limit {
                warn!("engine output still open after termination, abandoning reader");
                return;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    if handle.join().is_err() {
        error!("engine output reader panicked");
    }
}

// polled so that terminate() can take the lock while we wait
fn wait_child(child: &Mutex<Child>) -> std::io::Result<ExitStatus> {
    loop {
        if let Some(status) = lock(child).try_wait()? {
            return Ok(status);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
