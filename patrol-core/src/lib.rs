//! Patrol core library — domain types, persisted state, errors.
//!
//! Public API surface:
//! - [`types`] — value types and domain structs
//! - [`paths`] — `~/.patrol/…` layout helpers
//! - [`settings`] — validated configuration
//! - [`ledger`] — item → last-reviewed-revision ledger
//! - [`store`] — append-only review version store
//! - [`error`] — [`StoreError`]

pub mod error;
pub mod ledger;
pub mod paths;
pub mod settings;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use ledger::Ledger;
pub use settings::{FieldError, Settings, SettingsUpdate, SyncMode};
pub use types::{Candidate, ItemKey, ItemMeta, RepoSlug, ReviewVersion};
