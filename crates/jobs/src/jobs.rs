//! Job Engine (C9): per-device serialization of helper-process
//! invocations, with stdout progress parsing, cancellation, and a
//! completion outcome the caller (`storaged-ops`) turns into a reply.
//!
//! Grounded on the single-threaded cooperative model of §5: spawning
//! returns a future the caller awaits on the same event loop, rather than
//! a callback registered with a separate reactor — other events still get
//! serviced because this task is one among many on the `tokio` `LocalSet`.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};

use rustix::process::{kill_process, Pid, Signal};
use storaged_model::ObjectId;
use storaged_utils::SecretBytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Purely for observability: what kind of job occupies a device's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Helper,
    Local,
    Settle,
}

/// The outcome of a completed helper job, handed to the operation handler
/// that started it (§4.9 completion callback, minus the `context`/
/// `user_data` parameters which are just the caller's own stack frame
/// here).
#[derive(Debug)]
pub struct JobCompletion {
    pub was_cancelled: bool,
    pub exit_status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

impl JobCompletion {
    pub fn success(&self) -> bool {
        !self.was_cancelled && self.exit_status.map(|s| s.success()).unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobEngineError {
    #[error("device is busy")]
    Busy,
    #[error("failed to spawn helper: {0}")]
    Spawn(String),
}

/// A progress line is a fixed tag followed by a percentage in `[0,100]`,
/// e.g. `"progress: 42.5"` (§4.9 stdout parsing).
fn parse_progress_line(tag: &str, line: &str) -> Option<f64> {
    let rest = line.strip_prefix(tag)?;
    let rest = rest.trim_start_matches(':').trim();
    rest.parse::<f64>().ok().filter(|p| (0.0..=100.0).contains(p))
}

#[derive(Debug)]
struct JobSlot {
    kind: JobKind,
    name: String,
    initiated_by_uid: u32,
    is_cancellable: bool,
    percentage: f64,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Visible job state for a Device, mirrored by the caller onto
/// `Device::job` (§3 job attributes).
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub kind: JobKind,
    pub name: String,
    pub initiated_by_uid: u32,
    pub is_cancellable: bool,
    pub percentage: f64,
}

/// Per-device job slots. Enforces "at most one Job per Device" (§4.9,
/// §3 invariant 6) by construction: occupying a slot is the only way to
/// run a job, and `run_helper`/`local_start` both refuse a second
/// occupant.
#[derive(Debug, Default)]
pub struct JobEngine {
    slots: HashMap<ObjectId, JobSlot>,
}

impl JobEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self, device: &ObjectId) -> bool {
        self.slots.contains_key(device)
    }

    pub fn status(&self, device: &ObjectId) -> Option<JobStatus> {
        self.slots.get(device).map(|j| JobStatus {
            kind: j.kind,
            name: j.name.clone(),
            initiated_by_uid: j.initiated_by_uid,
            is_cancellable: j.is_cancellable,
            percentage: j.percentage,
        })
    }

    /// `job_local_start`: reserve `device`'s slot without spawning a
    /// helper, for operations that wait on an externally-driven
    /// convergence (e.g. LUKS Lock waiting for cleartext removal).
    pub fn local_start(
        &mut self,
        device: ObjectId,
        name: impl Into<String>,
        initiated_by_uid: u32,
    ) -> Result<(), JobEngineError> {
        if self.slots.contains_key(&device) {
            return Err(JobEngineError::Busy);
        }
        self.slots.insert(
            device,
            JobSlot {
                kind: JobKind::Local,
                name: name.into(),
                initiated_by_uid,
                is_cancellable: false,
                percentage: -1.0,
                cancel_tx: None,
            },
        );
        Ok(())
    }

    /// `job_local_end`.
    pub fn local_end(&mut self, device: &ObjectId) {
        self.slots.remove(device);
    }

    /// Request cancellation of a running, cancellable job. Signals
    /// SIGTERM only; per §9's open question, there is no SIGKILL
    /// escalation. Returns `false` if there was nothing cancellable to
    /// cancel.
    pub fn cancel(&mut self, device: &ObjectId) -> bool {
        match self.slots.get_mut(device) {
            Some(job) if job.is_cancellable => job.cancel_tx.take().map(|tx| tx.send(())).is_some(),
            _ => false,
        }
    }

    /// Spawn `argv[0]` (searched on `$PATH`) and run it to completion,
    /// occupying `device`'s slot for the duration. `stdin_data`, if
    /// present, is written and then dropped (zeroing it). Stdout lines
    /// starting with `progress_tag` update the slot's percentage and the
    /// full captured stdout/stderr are returned on completion.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_helper(
        &mut self,
        device: ObjectId,
        name: impl Into<String>,
        initiated_by_uid: u32,
        argv: &[String],
        stdin_data: Option<SecretBytes>,
        progress_tag: Option<&str>,
        is_cancellable: bool,
    ) -> Result<JobCompletion, JobEngineError> {
        if self.slots.contains_key(&device) {
            return Err(JobEngineError::Busy);
        }
        let Some(program) = argv.first() else {
            return Err(JobEngineError::Spawn("empty argv".to_string()));
        };

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.slots.insert(
            device.clone(),
            JobSlot {
                kind: JobKind::Helper,
                name: name.into(),
                initiated_by_uid,
                is_cancellable,
                percentage: -1.0,
                cancel_tx: Some(cancel_tx),
            },
        );

        tracing::debug!("spawning helper job for {device}: {argv:?}");
        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]);
        cmd.stdin(if stdin_data.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.slots.remove(&device);
                return Err(JobEngineError::Spawn(e.to_string()));
            }
        };

        if let Some(secret) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(secret.as_bytes()).await {
                    tracing::warn!("writing job stdin for {device}: {e}");
                }
            }
        }

        let mut stdout_lines = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
        let mut stderr_lines = BufReader::new(child.stderr.take().expect("piped stderr")).lines();
        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let mut was_cancelled = false;

        let exit_status = loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    if let Ok(Some(l)) = line {
                        if let Some(tag) = progress_tag {
                            if let Some(pct) = parse_progress_line(tag, &l) {
                                if let Some(job) = self.slots.get_mut(&device) {
                                    job.percentage = pct;
                                }
                            }
                        }
                        stdout_buf.push_str(&l);
                        stdout_buf.push('\n');
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Ok(Some(l)) = line {
                        stderr_buf.push_str(&l);
                        stderr_buf.push('\n');
                    }
                }
                _ = &mut cancel_rx, if !was_cancelled => {
                    was_cancelled = true;
                    if let Some(pid) = child.id().and_then(|p| Pid::from_raw(p as i32)) {
                        if let Err(e) = kill_process(pid, Signal::Term) {
                            tracing::warn!("sending SIGTERM to job for {device}: {e}");
                        }
                    }
                }
                status = child.wait() => {
                    break status.ok();
                }
            }
        };

        self.slots.remove(&device);
        Ok(JobCompletion { was_cancelled, exit_status, stdout: stdout_buf, stderr: stderr_buf })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_helper_captures_stdout() {
        let mut engine = JobEngine::new();
        let device = ObjectId::from_native_path("block/sda");
        let result = engine
            .run_helper(
                device,
                "test",
                0,
                &["echo".to_string(), "hello".to_string()],
                None,
                None,
                false,
            )
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_second_job_on_same_device_is_busy() {
        let mut engine = JobEngine::new();
        let device = ObjectId::from_native_path("block/sda");
        engine.local_start(device.clone(), "first", 0).unwrap();
        let err = engine
            .run_helper(device, "second", 0, &["true".to_string()], None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, JobEngineError::Busy));
    }

    #[tokio::test]
    async fn test_progress_line_updates_percentage() {
        assert_eq!(parse_progress_line("progress", "progress: 42.5"), Some(42.5));
        assert_eq!(parse_progress_line("progress", "progress: 142"), None);
        assert_eq!(parse_progress_line("progress", "unrelated line"), None);
    }

    #[tokio::test]
    async fn test_local_job_then_end_frees_slot() {
        let mut engine = JobEngine::new();
        let device = ObjectId::from_native_path("block/sda");
        engine.local_start(device.clone(), "wait", 1000).unwrap();
        assert!(engine.is_busy(&device));
        engine.local_end(&device);
        assert!(!engine.is_busy(&device));
    }
}
