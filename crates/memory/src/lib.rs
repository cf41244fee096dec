//! Session memory for chatrelay: sticky facts, rolling history and the
//! durable stores behind them.

pub mod history;
pub mod in_memory;
pub mod noop;
pub mod sticky;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use history::{HistoryStore, retained_count};
pub use in_memory::InMemoryStore;
pub use noop::NoopStore;
pub use sticky::{Directive, StickyStore, parse_directives};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
