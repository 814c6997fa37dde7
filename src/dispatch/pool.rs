//! Bounded pool for native executables
//!
//! At most `size` children run at once. Each dispatch gets its own result
//! channel so a caller can await completion or drop the receiver and move on.
//! A `ProcessSpec`'s timeout bounds the wait for a free slot as well as the run.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// How much of stderr is kept in a failure message
const STDERR_TAIL: usize = 512;

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

pub struct ProcessPool {
    permits: Arc<Semaphore>,
}

impl ProcessPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Queue `spec` and return the channel its result will arrive on
    pub fn submit(&self, spec: ProcessSpec) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let result = match tokio::time::timeout(spec.timeout, permits.acquire_owned()).await {
                Ok(Ok(_permit)) => execute(&spec).await,
                Ok(Err(_)) => Err(AppError::Internal("process pool closed".into())),
                Err(_) => {
                    warn!(
                        command = %spec.program_name(),
                        "No free process slot within {:?}",
                        spec.timeout
                    );
                    Err(AppError::Timeout(format!(
                        "{} waited {:?} for a free process slot",
                        spec.program_name(),
                        spec.timeout
                    )))
                }
            };
            if tx.send(result).is_err() {
                debug!(program = %spec.program_name(), "Result receiver dropped");
            }
        });

        rx
    }

    /// Run `spec` and wait for it to finish
    pub async fn run(&self, spec: ProcessSpec) -> Result<()> {
        let program = spec.program_name();
        self.submit(spec)
            .await
            .map_err(|_| AppError::process(program, "worker dropped before completion"))?
    }
}

async fn execute(spec: &ProcessSpec) -> Result<()> {
    let program = spec.program_name();
    debug!(command = %program, args = ?spec.args, "Spawning process");

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::process(&program, format!("failed to launch: {}", e)))?;

    // Dropping the wait future on timeout kills the child
    let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(output) => output.map_err(|e| AppError::process(&program, e.to_string()))?,
        Err(_) => {
            warn!(command = %program, "Process timed out after {:?}", spec.timeout);
            return Err(AppError::Timeout(format!(
                "{} did not finish within {:?}",
                program, spec.timeout
            )));
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let mut reason = output.status.to_string();
        let tail = stderr_tail(&stderr);
        if !tail.is_empty() {
            reason.push_str(": ");
            reason.push_str(tail);
        }
        warn!(command = %program, exit = ?output.status.code(), "Process failed");
        return Err(AppError::process(program, reason));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    info!(command = %program, exit = 0, "Process finished");
    if !stdout.trim().is_empty() {
        debug!(command = %program, stdout = %stdout.trim(), "Process output");
    }
    Ok(())
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}
