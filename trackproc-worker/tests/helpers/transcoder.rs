//! In-process transcoder double
//!
//! Each branch is a pair of in-memory pipes driven by its exit future, so a
//! branch only makes progress while the pipeline polls it, like a child
//! process blocked on its pipes.

use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use trackproc_worker::error::TranscodeError;
use trackproc_worker::transcode::{TranscodeProcess, TranscodeTarget, Transcoder};

/// Capacity of each in-memory pipe
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behaviour {
    /// Copy input to output unchanged
    Passthrough,
    /// Copy, close the output, then wait before exiting
    FinishAfter(Duration),
    /// Read a little, then exit with an error
    Fail,
    /// Copy everything, close the output, wait, then exit with an error
    FailAfter(Duration),
    /// Never read, never exit
    Stall,
}

/// Lifecycle counters for one branch kind
#[derive(Debug, Default)]
pub struct BranchProbe {
    pub started: AtomicUsize,
    /// Exit future resolved (success or failure)
    pub exited: AtomicUsize,
    /// Exit future dropped before resolving
    pub torn_down: AtomicUsize,
}

impl BranchProbe {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn exited(&self) -> usize {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }
}

/// Counts a teardown when dropped while still armed
struct TeardownGuard {
    probe: Arc<BranchProbe>,
    armed: bool,
}

impl TeardownGuard {
    fn new(probe: Arc<BranchProbe>) -> Self {
        Self { probe, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
        self.probe.exited.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.armed {
            self.probe.torn_down.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct ScriptedTranscoder {
    preview: Behaviour,
    output: Behaviour,
    pub preview_probe: Arc<BranchProbe>,
    pub output_probe: Arc<BranchProbe>,
    starts: Mutex<Vec<(TranscodeTarget, Option<String>)>>,
}

impl ScriptedTranscoder {
    pub fn new(preview: Behaviour, output: Behaviour) -> Self {
        Self {
            preview,
            output,
            preview_probe: Arc::new(BranchProbe::default()),
            output_probe: Arc::new(BranchProbe::default()),
            starts: Mutex::new(Vec::new()),
        }
    }

    pub fn passthrough() -> Self {
        Self::new(Behaviour::Passthrough, Behaviour::Passthrough)
    }

    /// Targets and source formats of every branch started so far
    pub fn starts(&self) -> Vec<(TranscodeTarget, Option<String>)> {
        self.starts.lock().unwrap().clone()
    }
}

fn scripted_failure() -> TranscodeError {
    TranscodeError::Exited {
        program: "scripted".to_string(),
        status: "exit status: 2".to_string(),
        stderr: "scripted failure".to_string(),
    }
}

async fn pump(input: &mut DuplexStream, output: &mut DuplexStream) -> Result<(), TranscodeError> {
    tokio::io::copy(input, output).await?;
    output.shutdown().await?;
    Ok(())
}

impl Transcoder for ScriptedTranscoder {
    fn start(
        &self,
        target: &TranscodeTarget,
        input_format: Option<&str>,
    ) -> Result<TranscodeProcess, TranscodeError> {
        let (behaviour, probe) = if target.format == "wav" {
            (self.preview, self.preview_probe.clone())
        } else {
            (self.output, self.output_probe.clone())
        };
        self.starts
            .lock()
            .unwrap()
            .push((target.clone(), input_format.map(str::to_string)));
        probe.started.fetch_add(1, Ordering::SeqCst);

        let (input_writer, mut input_reader) = duplex(PIPE_CAPACITY);
        let (mut output_writer, output_reader) = duplex(PIPE_CAPACITY);
        let guard = TeardownGuard::new(probe);

        let exit = async move {
            let result = match behaviour {
                Behaviour::Passthrough => pump(&mut input_reader, &mut output_writer).await,
                Behaviour::FinishAfter(delay) => {
                    let result = pump(&mut input_reader, &mut output_writer).await;
                    tokio::time::sleep(delay).await;
                    result
                }
                Behaviour::Fail => {
                    let mut buf = [0u8; 64];
                    let _ = input_reader.read(&mut buf).await;
                    drop(input_reader);
                    drop(output_writer);
                    Err(scripted_failure())
                }
                Behaviour::FailAfter(delay) => {
                    let _ = pump(&mut input_reader, &mut output_writer).await;
                    tokio::time::sleep(delay).await;
                    Err(scripted_failure())
                }
                Behaviour::Stall => std::future::pending::<Result<(), TranscodeError>>().await,
            };
            guard.disarm();
            result
        }
        .boxed();

        Ok(TranscodeProcess {
            input: Box::new(input_writer),
            output: Box::new(output_reader),
            exit,
        })
    }
}
