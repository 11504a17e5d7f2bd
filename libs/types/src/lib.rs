//! # farm-types
//!
//! Shared domain types for the renderfarm control plane.
//!
//! ## Entities
//!
//! - [`Device`]: a cluster node registration (manager or worker)
//! - [`Job`]: a render job with an inclusive frame range and a parallelism cap
//! - [`Task`]: a unit of work bound to exactly one job
//! - [`StreamFrame`]: the tagged wire envelope carried on the job event stream
//!
//! All wire types serialize with `snake_case` field values so they match the
//! backend job API payloads byte-for-byte.

mod device;
mod job;
mod stream;
mod task;

pub use device::*;
pub use job::*;
pub use stream::*;
pub use task::*;
