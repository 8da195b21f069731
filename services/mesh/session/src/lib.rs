//! Deferred work, WebSocket clients and handshake tokens for a mesh node.
//!
//! Everything that happens on a node after boot is a [`Job`]: timers,
//! socket callbacks and the DNS listener submit jobs to a bounded
//! [`JobQueue`], and a single [`JobWorker`] runs them one at a time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_session::{spawn_periodic, Job, JobHandler, JobQueue, DEFAULT_PACE, WS_QUEUE_SIZE};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Print;
//!
//! #[async_trait::async_trait]
//! impl JobHandler for Print {
//!     async fn handle(&self, job: Job) -> anyhow::Result<()> {
//!         println!("running {}", job.kind());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() {
//! let (queue, worker) = JobQueue::new(WS_QUEUE_SIZE, DEFAULT_PACE);
//! spawn_periodic("telemetry", queue.clone(), Duration::from_secs(5), || Job::SendTelemetry);
//! worker.run(Arc::new(Print)).await;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clients;
pub mod error;
pub mod handshake;
pub mod job;
pub mod queue;
pub mod timers;

// Re-export main types
pub use clients::{ClientRecord, ClientTable, ConnectionId, PeerKind, WS_CONFIG_MAX_CLIENTS};
pub use error::SessionError;
pub use handshake::{parse_handshake_uri, HandshakeRequest, TokenIssuer, DEFAULT_TOKEN_LEN};
pub use job::{DnsQuery, Job, JobKind};
pub use queue::{JobHandler, JobQueue, JobWorker, DEFAULT_PACE, WS_QUEUE_SIZE};
pub use timers::spawn_periodic;
