//! Reference implementations of the external-collaborator traits
//! (`StateProvider`, notification sinks). None of these are required —
//! operators can implement `StateProvider` against whatever store they
//! already run — but a crate that only defines traits isn't runnable, so
//! these ship alongside the core the same way a log-list fetcher ships
//! alongside a CT client.

pub mod filesystem;
pub mod memory;
pub mod notify;
