// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod command;
mod validate;
mod workdir;

pub use command::{run_command, CommandOutput, CommandSpec};
pub use validate::{validate_args, validate_workdir};
pub use workdir::ScopedWorkdir;
