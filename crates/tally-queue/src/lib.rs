//! # tally-queue — Job Queue Service
//!
//! Generic named-queue abstraction for the Tally escrow stack:
//!
//! - **Jobs** ([`job`]): the persisted record an operator can inspect —
//!   id, queue, type, payload, attempts, status, last error.
//!
//! - **Backoff** ([`backoff`]): exponential, capped retry delays with
//!   presets for payment and notification traffic.
//!
//! - **Backing store** ([`store`]): the [`JobStore`] contract plus the
//!   in-process implementation; a durable broker plugs in at this seam.
//!
//! - **Service** ([`service`]): queue registration, enqueue,
//!   concurrency-limited worker pools, retry/dead-letter settling, and
//!   drain-on-shutdown.
//!
//! The crate knows nothing about escrow or disputes; domain processors
//! implement [`JobHandler`] in `tally-settlement`.

pub mod backoff;
pub mod error;
pub mod job;
pub mod service;
pub mod store;

pub use backoff::BackoffPolicy;
pub use error::{JobError, QueueError};
pub use job::{Job, JobId, JobStatus};
pub use service::{EnqueueOptions, FnHandler, HandlerFuture, JobHandler, QueueConfig, QueueService};
pub use store::{InMemoryJobStore, JobStore};
