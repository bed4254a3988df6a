//! In-memory storage implementations
//!
//! This module provides an in-memory implementation of the key-value
//! storage trait. It is suitable for development, testing, and
//! single-process deployments.

mod kv;

pub use kv::MemoryKeyValueStore;
