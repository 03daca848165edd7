//! gangway-cache: the long-lived cluster cache and the bind path.
//!
//! The cache ingests cluster events, hands each scheduling cycle an
//! isolated [`Snapshot`], and receives the results of binds. Binding runs
//! on a bounded worker pool that talks to the external API through the
//! [`Binder`] and [`VolumeBinder`] seams.
//!
//! # Architecture
//!
//! ```text
//! ClusterEvent ──mpsc──► SchedulerCache ──snapshot()──► Session (one cycle)
//!                            ▲
//!                            │ bind_succeeded / bind_failed
//!                       bind_batch (JoinSet + Semaphore)
//!                            ├── VolumeBinder::bind_volumes
//!                            ├── VolumeBinder::dynamic_provisions
//!                            └── Binder::bind (retry on conflict)
//! ```

pub mod binder;
pub mod cache;
pub mod error;
pub mod event;
pub mod interface;
pub mod retry;

#[cfg(any(test, feature = "in-memory"))]
pub mod recording;

pub use binder::{BindOptions, BindReport, BindRequest, bind_batch};
pub use cache::{SchedulerCache, Snapshot};
pub use error::{BindError, CacheError, CacheResult, VolumeError};
pub use event::ClusterEvent;
pub use interface::{Binder, BoxFuture, StatusUpdater, VolumeBinder};
pub use retry::{RetryPolicy, retry_on_conflict};
