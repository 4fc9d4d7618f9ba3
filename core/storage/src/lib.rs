//! Storage tiers for PrefSync.
//!
//! This module provides a trait-based interface over the four places a
//! preference document lives, from fastest to most authoritative:
//! tab cache (T1), per-browser key-value store (T2), per-browser structured
//! store (T3) and the remote account store (T4).
//!
//! # Design Principles
//! - Tier isolation: no tier knows about another; the sync engine fans out
//! - Async operations: all operations are async, even over blocking backends
//! - Unified error semantics: quota, parse and network failures share one taxonomy

pub mod kv;
pub mod memory;
pub mod remote;
pub mod structured;
pub mod tier;

pub use kv::{KvBackend, KvStore, KvTier, StorageEvent};
pub use memory::{MemoryKv, TabCache};
pub use remote::{HttpRemoteTier, MemoryRemote, MemoryRemoteServer, RemoteConfig};
pub use structured::{OfflineTier, StructuredStore};
pub use tier::{decode_document, encode_document, KeyValueStore, StorageTier};
