//! Collaborator interfaces shared by the hub and the lane manager.

pub mod traits;

pub use traits::{CrashReport, CrashSink, EventSink};
