pub mod executor;

pub use executor::{stderr_reports_not_found, CommandExecutor, ExecError, ExecutionResult, NotFoundPredicate};
