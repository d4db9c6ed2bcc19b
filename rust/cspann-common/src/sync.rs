//! A thread-safety bound that holds on native targets and vanishes on
//! `wasm32-unknown-unknown`.
//!
//! KV backends, quantizers and catalogs are shared between tasks on native
//! targets, so the traits describing them require `Send + Sync`. Browser
//! builds are single threaded and their JS-backed handles are neither, so
//! there the bound is satisfied by every type.

#[cfg(not(target_arch = "wasm32"))]
mod bounds {
    /// `Send + Sync` on native targets, no bound on wasm32
    pub trait ConditionalSync: Send + Sync {}
    impl<T: Send + Sync> ConditionalSync for T {}
}

#[cfg(target_arch = "wasm32")]
mod bounds {
    /// `Send + Sync` on native targets, no bound on wasm32
    pub trait ConditionalSync {}
    impl<T> ConditionalSync for T {}
}

pub use bounds::*;
