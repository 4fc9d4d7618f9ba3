//! Remote account-scoped tier (T4).
//!
//! Two implementations of the same contract:
//! - `HttpRemoteTier` - talks to the preferences API over HTTP
//! - `MemoryRemote` - in-process fake with failure injection

mod http;
mod memory;

pub use http::{HttpRemoteTier, RemoteConfig};
pub use memory::{MemoryRemote, MemoryRemoteServer};
