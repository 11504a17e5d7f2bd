//! Render-farm worker library.
//!
//! - **JobApiClient**: typed client for the backend job/device API
//! - **JobEventChannel**: job lifecycle updates over a duplex WebSocket
//! - **RenderCache**: disk-resident asset cache with threshold eviction
//! - **TaskRunner**: the supervised claim/render/upload loop

pub mod cache;
pub mod client;
pub mod config;
pub mod runner;
pub mod stream;
