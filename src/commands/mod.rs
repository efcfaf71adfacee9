pub mod dispatcher;
pub mod executor;
pub mod kind;
pub mod ledger;
pub mod result;
pub mod runner;
pub mod shortcut;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::{BatchDispatcher, DispatchOutcome};
pub use executor::CommandExecutor;
pub use kind::{Command, CommandKind};
pub use ledger::{Ledger, LedgerEntry};
pub use result::{ErrorReport, ExecutionResult};
pub use runner::{CommandRunner, ProcessOutput, ShellRunner};
pub use shortcut::ShortcutWriter;
