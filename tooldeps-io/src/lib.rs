// tooldeps-io/src/lib.rs
//! Blocking IO primitives for tooldeps (filesystem, json, process, locking)

pub mod fs;
pub mod json_io;
pub mod lock;
pub mod process;

pub use fs::*;
pub use json_io::{read_json_sync, write_json_sync};
pub use lock::with_file_lock;
pub use process::{
    check_output, run_command_sync, CommandOutput, CommandRunner, CommandSpec,
    SystemCommandRunner,
};
