//! Execution collaborators: the command executor, the command registry, the
//! post-run recorder, and the session title assigner.
//!
//! The scheduler only talks to these through traits; concrete
//! implementations live with the embedding application. This module ships a
//! subprocess executor and a directory-backed registry for the bundled CLI.

mod executor;
mod process;
mod recorder;
mod registry;
mod titles;

pub use executor::{
    CommandExecutor, ExecutionObserver, ExecutionReport, ExecutionRequest, ExecutorError,
    ExecutorEvent, SharedObserver,
};
pub use process::ProcessCommandExecutor;
pub use recorder::{dispatch_post_run, CommandRunRecord, LogRecorder, PostRunRecorder};
pub use registry::{CommandRegistry, DirectoryCommandRegistry, RegistryError};
pub use titles::{format_command_title, TitleAssigner, TitleError};
