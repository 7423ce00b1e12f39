//! Job graph and fence model.
//!
//! Stages run as jobs on a dedicated worker pool. Each job returns a
//! [`Fence`]; later jobs depend on it (or on a [`Fence::combine`] of several)
//! and only start once every write they rely on is visible.
//!
//! Data shared between jobs lives in [`Buffer`]s. A job declares which
//! buffers it reads and which it writes in its [`JobDesc`]; the pipeline is
//! correct when no two jobs with overlapping writes can run without a fence
//! between them.

pub mod buffer;
pub mod fence;
pub mod graph;

pub use buffer::{Buffer, BufferId};
pub use fence::Fence;
pub use graph::{AccessTracker, JobDesc, JobGraph, JobStats};
