//! # Canvas Client
//!
//! Asynchronous orchestration around [`canvas_core`]: prompts become
//! generation jobs, results stream back into the scene by element key, and
//! the scene and viewport are saved as they change.
//!
//! ## Architecture
//!
//! - [`workspace::Workspace`] - loads a workspace, arms autosave, resumes
//!   runs that were still in flight
//! - [`queue::GenerationQueue`] - bounded-concurrency job queue
//! - [`stream`] - run event parsing and reconciliation
//! - [`autosave::Autosaver`] - debounced, retried, idempotent saves
//! - [`services`] - collaborator traits; [`http::HttpBackend`] implements
//!   them over HTTP and [`memory::MemoryBackend`] in memory
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use canvas_client::{ClientConfig, HttpBackend, Services, Workspace};
//!
//! # async fn run() -> canvas_client::ClientResult<()> {
//! let config = ClientConfig::default();
//! let backend = HttpBackend::from_config(&config)?;
//! let workspace = Workspace::open(config, Services::from_backend(Arc::new(backend))).await?;
//! for job in workspace.submit("a red fox (@size:1024x768)").await? {
//!     println!("{:?}", job.outcome().await.status);
//! }
//! workspace.flush().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod autosave;
pub mod config;
pub mod debounce;
pub mod error;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod services;
pub mod stream;
pub mod workspace;

pub use autosave::{Autosaver, SaveReport};
pub use config::{CliArgs, ClientConfig, RetryConfig};
pub use error::{ClientError, ClientResult};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use queue::{GenerationJob, GenerationQueue, JobHandle, JobOutcome, JobStatus};
pub use services::{
    AssetStore, GenerationService, LoadedScene, PlanService, PlanStep, RunHandle, RunRequest, ScenePersistence,
    Services, UploadSource,
};
pub use stream::{RunEvent, SseDecoder};
pub use workspace::{LoadReport, Workspace};
