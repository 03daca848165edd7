//! gangway-framework: sessions, plugin tiers and transactional placement.
//!
//! Each scheduling cycle opens a [`Session`] over a cache snapshot. The
//! session instantiates the plugins named in the configured tiers and
//! answers the questions actions ask (which job next, which node, may this
//! gang keep its placements) by consulting them in tier order. Actions
//! change the session only through a [`Statement`], so a job's placements
//! are committed or reverted as a unit.
//!
//! # Architecture
//!
//! ```text
//! Snapshot ──open_session──► Session ◄── PluginRegistry (tiers of plugins)
//!                              │
//!              Statement::allocate / commit / discard
//!                              │
//!                           close() ──► SessionOutcome { binds, status }
//! ```

pub mod conf;
pub mod error;
pub mod plugin;
pub mod predicate;
pub mod registry;
pub mod session;
pub mod statement;

pub use conf::{Arguments, Capability, PluginOption, SchedulerConfiguration, Tier};
pub use error::{FrameworkError, FrameworkResult};
pub use plugin::{Plugin, ValidateResult, Vote};
pub use predicate::{PredicateOutcome, predicate_nodes, prioritize_nodes, select_best_node};
pub use registry::{PluginBuilder, PluginRegistry};
pub use session::{Session, SessionOutcome, SessionState, open_session};
pub use statement::Statement;
