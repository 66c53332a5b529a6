use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::BuildError;
use crate::exec::CommandOutput;
use crate::model::ActionRequest;

/// Executes one action inside a prepared working directory.
///
/// The worker pipeline owns fingerprinting, cache traffic, staging, and
/// output collection; implementations of this trait only run the command.
/// The production implementation shells out to the target's toolchain (in
/// array form, never through a shell); tests substitute stubs that write
/// the declared outputs directly.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run `request`'s command with `workdir` as the working directory.
    ///
    /// A nonzero exit is reported inside the `Ok` output; `Err` is reserved
    /// for the command not running to completion (spawn failure, timeout,
    /// signal, cancellation, validator rejection).
    async fn execute(
        &self,
        request: &ActionRequest,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, BuildError>;
}
