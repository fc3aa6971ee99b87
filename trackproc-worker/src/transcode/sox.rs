//! `sox` as the external transcoder
//!
//! Each branch is one child process reading stdin and writing stdout. The
//! child is killed if its exit future is dropped before completion.

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use super::{TranscodeProcess, TranscodeTarget, Transcoder};
use crate::error::TranscodeError;

/// Limit on captured stderr kept for error messages
const STDERR_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct SoxTranscoder {
    program: PathBuf,
}

impl Default for SoxTranscoder {
    fn default() -> Self {
        Self::new("sox")
    }
}

impl SoxTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command-line arguments for one branch
    pub fn arguments(target: &TranscodeTarget, input_format: Option<&str>) -> Vec<String> {
        let mut args = vec!["--no-show-progress".to_string()];
        if let Some(format) = input_format {
            args.push("-t".to_string());
            args.push(format.to_string());
        }
        args.push("-".to_string());
        args.extend([
            "-r".to_string(),
            target.sample_rate.to_string(),
            "-c".to_string(),
            target.channels.to_string(),
        ]);
        if let Some(bits) = target.bits {
            args.push("-b".to_string());
            args.push(bits.to_string());
        }
        args.extend(["-t".to_string(), target.format.clone(), "-".to_string()]);
        args
    }
}

impl Transcoder for SoxTranscoder {
    fn start(
        &self,
        target: &TranscodeTarget,
        input_format: Option<&str>,
    ) -> Result<TranscodeProcess, TranscodeError> {
        let program = self.program.display().to_string();
        let args = Self::arguments(target, input_format);
        debug!(program = %program, args = ?args, "Starting transcoder");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Launch {
                program: program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(TranscodeError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(TranscodeError::MissingPipe("stdout"))?;
        let mut stderr = child.stderr.take().ok_or(TranscodeError::MissingPipe("stderr"))?;

        let exit: BoxFuture<'static, Result<(), TranscodeError>> = Box::pin(async move {
            // Drain stderr alongside wait() so a chatty child cannot block on a full pipe
            let mut captured = Vec::new();
            let (status, _) = tokio::join!(child.wait(), stderr.read_to_end(&mut captured));
            let status = status?;

            if status.success() {
                return Ok(());
            }

            captured.truncate(STDERR_LIMIT);
            Err(TranscodeError::Exited {
                program,
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&captured).trim().to_string(),
            })
        });

        Ok(TranscodeProcess {
            input: Box::new(stdin),
            output: Box::new(stdout),
            exit,
        })
    }
}
