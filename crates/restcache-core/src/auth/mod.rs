//! Session token storage.
//!
//! This module provides:
//! - `SessionStore`: the abstraction services and the transport use to reach the token
//! - `MemorySessionStore`: process-local storage, used by tests and one-shot runs
//! - `FileSessionStore`: a JSON session file in the cache directory
//! - `KeyringSessionStore`: OS-level secure storage via keyring
//!
//! Every backend keeps a single token under the fixed key `token`.

pub mod credentials;
pub mod session;

pub use credentials::KeyringSessionStore;
pub use session::{FileSessionStore, MemorySessionStore, SessionData, SessionStore, TOKEN_KEY};
