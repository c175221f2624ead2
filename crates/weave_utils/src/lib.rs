pub mod errors;
pub mod logger;
pub mod suggest;

pub use errors::{Diagnostic, DiagnosticSeverity, emit_diagnostics};
pub use suggest::find_best_match;
