//! Persistence of per-file read positions across restarts.

mod error;
mod persistence;
mod position;

pub use error::StateError;
pub use persistence::StatePersistence;
pub use position::{FilePosition, WatcherState, STATE_VERSION};
