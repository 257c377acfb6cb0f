//! Session management for CareConnect
//!
//! Keeps the bearer token and profile snapshot on disk, and exposes the
//! signed-in identity to the rest of the client.

pub mod service;
pub mod state;
pub mod storage;

pub use service::{RehydrationPolicy, SessionError, SessionStore};
pub use state::{AuthState, SessionHandle};
pub use storage::{EncryptedFileStorage, MemoryStorage, SessionStorage, TOKEN_KEY, USER_KEY};
