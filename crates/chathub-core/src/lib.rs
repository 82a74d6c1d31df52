//! In-memory state, session management, fan-out broadcast, and directory
//! bookkeeping for the chat hub (§4.2-§4.4, §4.6).

pub mod broadcast;
pub mod directory;
pub mod durable;
pub mod error;
pub mod memdb;
pub mod model;
pub mod session;

pub use broadcast::Broadcaster;
pub use error::CoreError;
pub use memdb::MemDb;
pub use session::{SessionManager, SessionManagerLimits};
