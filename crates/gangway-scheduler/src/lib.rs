//! gangway-scheduler: actions and the periodic scheduling loop.
//!
//! A cycle snapshots the cache, opens a session with the configured plugin
//! tiers, runs each configured action over it and dispatches what the
//! session committed. The only action so far is [`Allocate`], which places
//! pending tasks of admitted jobs with gang, fairness and node-fit rules.
//!
//! # Architecture
//!
//! ```text
//! Scheduler::run (interval, watch shutdown)
//!   └── run_once
//!         ├── SchedulerCache::snapshot
//!         ├── open_session (tiers from SchedulerConfig)
//!         ├── Action::execute ... (cancel checked between actions)
//!         ├── Session::close ──► binds + status updates
//!         ├── SchedulerCache::reserve_binds
//!         ├── bind_batch (Binder, VolumeBinder)
//!         └── StatusUpdater (retry on conflict)
//! ```

pub mod action;
pub mod allocate;
pub mod config;
pub mod error;
pub mod scheduler;

pub use action::{Action, build_actions};
pub use allocate::Allocate;
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{CycleReport, Scheduler};
