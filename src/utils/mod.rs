pub mod profiler;

pub use weave_utils::{errors, logger};
