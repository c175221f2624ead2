//! Interpreter for module code, used to execute woven members against a
//! live cache provider.

pub mod error;
pub mod format;
pub mod host;
pub mod interpreter;
pub mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use format::format_template;
pub use host::TRACE_TARGET;
pub use interpreter::{DEFAULT_MAX_DEPTH, DEFAULT_STEP_LIMIT, Interpreter, MAX_ARRAY_LEN};
pub use value::{Object, Value};
