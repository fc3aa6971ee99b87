//! Stage tasks of one job
//!
//! Each function is the body of one task in the job's `JoinSet`. Errors are
//! attributed to the stage whose stream failed.

use futures::future::BoxFuture;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{PipelineError, Stage, TranscodeError};
use crate::storage::{ObjectReader, ObjectUpload};
use crate::waveform::{decode_reader, DecodeError, PreviewConfig, PreviewResult, READ_CHUNK_SIZE};

type BranchInput = Box<dyn AsyncWrite + Send + Unpin>;
type BranchOutput = Box<dyn AsyncRead + Send + Unpin>;
type BranchExit = BoxFuture<'static, Result<(), TranscodeError>>;

/// Fan the input object out to both branch inputs
///
/// Every chunk is written to both branches before the next read, so the
/// slower branch paces the reader. Both inputs are closed at end of stream.
pub(crate) async fn tee_input(
    mut input: ObjectReader,
    mut preview: BranchInput,
    mut output: BranchInput,
) -> Result<u64, PipelineError> {
    let started = Instant::now();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| PipelineError::stream(Stage::Input, e))?;
        if n == 0 {
            break;
        }
        preview
            .write_all(&buf[..n])
            .await
            .map_err(|e| PipelineError::stream(Stage::PreviewBranch, e))?;
        output
            .write_all(&buf[..n])
            .await
            .map_err(|e| PipelineError::stream(Stage::OutputBranch, e))?;
        total += n as u64;
    }

    preview
        .shutdown()
        .await
        .map_err(|e| PipelineError::stream(Stage::PreviewBranch, e))?;
    output
        .shutdown()
        .await
        .map_err(|e| PipelineError::stream(Stage::OutputBranch, e))?;
    // Child pipes only signal EOF once dropped
    drop(preview);
    drop(output);

    debug!(
        bytes = total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Input fully read"
    );
    Ok(total)
}

/// Feed an object into the preview branch alone
pub(crate) async fn feed_preview(
    mut input: ObjectReader,
    mut preview: BranchInput,
) -> Result<u64, PipelineError> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| PipelineError::stream(Stage::Input, e))?;
        if n == 0 {
            break;
        }
        preview
            .write_all(&buf[..n])
            .await
            .map_err(|e| PipelineError::stream(Stage::PreviewBranch, e))?;
        total += n as u64;
    }

    preview
        .shutdown()
        .await
        .map_err(|e| PipelineError::stream(Stage::PreviewBranch, e))?;
    drop(preview);

    debug!(bytes = total, "Published output fully read");
    Ok(total)
}

/// Decode the preview branch's output
///
/// Resolves once the decoder has consumed the whole stream and the branch
/// has exited cleanly.
pub(crate) async fn run_preview(
    mut branch_output: BranchOutput,
    exit: BranchExit,
    config: PreviewConfig,
) -> Result<PreviewResult, PipelineError> {
    let decode = async {
        decode_reader(&mut branch_output, config)
            .await
            .map_err(|e| match e {
                DecodeError::Format(format) => PipelineError::Format(format),
                DecodeError::Io(io) => PipelineError::stream(Stage::PreviewBranch, io),
            })
    };
    let exit = async {
        exit.await
            .map_err(|e| PipelineError::stream(Stage::PreviewBranch, e))
    };

    let (preview, ()) = tokio::try_join!(decode, exit)?;
    debug!(values = preview.len(), "Preview decoded");
    Ok(preview)
}

/// Copy the output branch into the upload and commit it
///
/// The upload is only committed after the branch exited cleanly; returns
/// the number of bytes uploaded.
pub(crate) async fn run_upload(
    mut branch_output: BranchOutput,
    exit: BranchExit,
    mut upload: Box<dyn ObjectUpload>,
) -> Result<u64, PipelineError> {
    let copy = async {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = branch_output
                .read(&mut buf)
                .await
                .map_err(|e| PipelineError::stream(Stage::OutputBranch, e))?;
            if n == 0 {
                break;
            }
            upload
                .write_all(&buf[..n])
                .await
                .map_err(|e| PipelineError::stream(Stage::Upload, e))?;
            total += n as u64;
        }
        Ok::<u64, PipelineError>(total)
    };
    let exit = async {
        exit.await
            .map_err(|e| PipelineError::stream(Stage::OutputBranch, e))
    };

    let (total, ()) = tokio::try_join!(copy, exit)?;

    upload
        .commit()
        .await
        .map_err(|e| PipelineError::stream(Stage::Upload, e))?;
    debug!(bytes = total, "Upload committed");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::header::tests::canonical_header;
    use crate::waveform::PREVIEW_RESOLUTION;
    use futures::FutureExt;
    use std::io;
    use tokio::io::duplex;

    fn ok_exit() -> BranchExit {
        async { Ok(()) }.boxed()
    }

    #[tokio::test]
    async fn test_tee_writes_every_byte_to_both_branches() {
        let source: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let (preview_in, mut preview_out) = duplex(1024);
        let (output_in, mut output_out) = duplex(1024);

        let reader: ObjectReader = Box::new(io::Cursor::new(source.clone()));
        let tee = tokio::spawn(tee_input(reader, Box::new(preview_in), Box::new(output_in)));

        let mut a = Vec::new();
        let mut b = Vec::new();
        let (ra, rb) = tokio::join!(preview_out.read_to_end(&mut a), output_out.read_to_end(&mut b));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(tee.await.unwrap().unwrap(), source.len() as u64);
        assert_eq!(a, source);
        assert_eq!(b, source);
    }

    #[tokio::test]
    async fn test_tee_reports_closed_branch() {
        let (preview_in, preview_out) = duplex(64);
        let (output_in, _output_out) = duplex(1 << 20);
        drop(preview_out);

        let reader: ObjectReader = Box::new(io::Cursor::new(vec![1u8; 4096]));
        let err = tee_input(reader, Box::new(preview_in), Box::new(output_in))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::PreviewBranch));
    }

    #[tokio::test]
    async fn test_preview_format_error_is_not_a_stream_error() {
        let output: BranchOutput = Box::new(io::Cursor::new(b"ID3\x04garbage".to_vec()));
        let err = run_preview(output, ok_exit(), PreviewConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Format(_)));
    }

    #[tokio::test]
    async fn test_preview_waits_for_branch_exit() {
        let wav = canonical_header(1, 8000, 16, 0);
        let output: BranchOutput = Box::new(io::Cursor::new(wav));
        let exit: BranchExit = async {
            Err(TranscodeError::Exited {
                program: "sox".to_string(),
                status: "exit status: 2".to_string(),
                stderr: "boom".to_string(),
            })
        }
        .boxed();

        let err = run_preview(output, exit, PreviewConfig::default()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::PreviewBranch));

        let output: BranchOutput = Box::new(io::Cursor::new(canonical_header(1, 8000, 16, 0)));
        let preview = run_preview(output, ok_exit(), PreviewConfig::default()).await.unwrap();
        assert_eq!(preview.len(), PREVIEW_RESOLUTION);
    }
}
