//! Test helper modules for trackproc-worker integration tests
//!
//! - ScriptedTranscoder: in-process branches with scripted behaviour
//! - wav: canonical WAV fixtures
//! - fakes: scripted queue, recording job runner, failing track store
//! - TestEnv: object store on a tempdir plus a SQLite database

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod env;
pub mod fakes;
pub mod transcoder;
pub mod wav;

pub use env::TestEnv;
pub use fakes::{FlakyTrackStore, QueueStep, RecordingRunner, ScriptedQueue};
pub use transcoder::{Behaviour, BranchProbe, ScriptedTranscoder};
