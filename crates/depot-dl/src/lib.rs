//! Job schedulers for the depot metadata resolution core.
//!
//! Two schedulers share one life-cycle: [`HttpDownloader`] for outbound
//! fetches and [`ProcessExecutor`] for child processes. Each keeps an arena of
//! jobs, starts at most a configured number of them at once, and hands results
//! to callers through [`JobFuture`]s. [`Loop`] waits on batches of futures by
//! polling both schedulers until every member is settled.
//!
//! Progress is only made while a caller is inside a poll
//! ([`HttpDownloader::count_active_jobs`], [`Loop::wait`], or one of the
//! synchronous helpers such as [`HttpDownloader::get`]).

pub mod auth;
pub mod downloader;
pub mod error;
pub mod event_loop;
pub mod http_client;
pub mod job;
pub mod process;
pub mod request;

pub use auth::{AuthProvider, StaticAuth};
pub use downloader::{DownloaderOptions, HttpDownloader};
pub use error::{JobError, Result};
pub use event_loop::{AbortHandle, Loop};
pub use http_client::{AbortSignal, ClientConfig, Transport, UreqTransport};
pub use job::{JobFuture, JobId, JobRef, JobStatus, Settle};
pub use process::{ProcessExecutor, ProcessOutput, ProcessRequest};
pub use request::{FetchOptions, FetchRequest, Method, Response};
