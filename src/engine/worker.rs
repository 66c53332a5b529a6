// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The per-action worker pipeline.
//!
//! Every action goes through the same six steps: resolve the fingerprint,
//! query the cache, stage inputs into a scoped working directory, execute
//! the command, install outputs into the content store, publish the result.
//! A cache hit short-circuits after step two and republishes the stored
//! outputs. The single-flight handshake around the build step guarantees
//! that two workers racing on the same fingerprint — including a stolen
//! copy of a retried action — execute it at most once.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::{ActionCache, CacheEntry, OutputFile, SingleFlight};
use crate::errors::{BuildError, ExecutionError};
use crate::exec::{run_command, CommandOutput, CommandSpec, ScopedWorkdir};
use crate::hash::{hash_file, input_hash, Digest, FileHasher};
use crate::model::{
    ActionId, ActionRequest, ActionResult, ActionStatus, FailureKind, ResourceUsage, Target,
};
use crate::observability::messages::worker::ActionFinished;
use crate::observability::messages::StructuredLog;
use crate::traits::{ActionExecutor, CommandAdapter, LanguageAdapter, ResultSink};

/// Wall-clock nanoseconds since the unix epoch. The cache takes timestamps
/// as parameters; this is the production boundary that supplies them.
pub(crate) fn unix_now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Everything a worker needs to run actions. Shared read-only across the
/// pool.
pub struct WorkerContext {
    pub workspace_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub cache: Arc<ActionCache>,
    pub hasher: Arc<FileHasher>,
    pub executor: Arc<dyn ActionExecutor>,
    pub sink: Arc<dyn ResultSink>,
    pub cancel: CancellationToken,
}

/// Render a target into the request the scheduler queues for it.
///
/// `base_env` is the workspace-wide environment passthrough; the target's
/// own `lang_config.env` overlays it.
pub fn plan_request(
    target: &Target,
    base_env: &BTreeMap<String, String>,
    dep_hashes: Vec<Digest>,
    priority: u32,
) -> Result<ActionRequest, BuildError> {
    let adapter = CommandAdapter;
    let plan = adapter.plan(target)?;
    let mut env = base_env.clone();
    env.extend(adapter.env(target)?);

    let inputs = target
        .sources
        .iter()
        .map(|source| (PathBuf::from(source), Digest::ZERO))
        .collect();

    Ok(ActionRequest {
        id: ActionId::new(target.id.clone(), plan.action_type, 0, Digest::ZERO),
        target_id: target.id.clone(),
        inputs,
        dep_hashes,
        command: plan.command,
        env,
        outputs: plan.outputs,
        metadata: plan.metadata,
        priority,
    })
}

/// Run one action to a terminal [`ActionResult`]. Never errors: every
/// failure is folded into the result so the scheduler sees a uniform
/// stream.
pub async fn run_action(ctx: &WorkerContext, mut request: ActionRequest) -> ActionResult {
    let started = Instant::now();

    // Step 1: resolve the fingerprint. Source digests come through the
    // two-tier fast path; unchanged files cost a stat, not a read.
    let mut source_fingerprints = Vec::with_capacity(request.inputs.len());
    let mut input_io_error: Option<(PathBuf, std::io::Error)> = None;
    for (path, digest) in request.inputs.iter_mut() {
        match ctx.hasher.fingerprint(&ctx.workspace_root.join(&*path)) {
            Ok(fingerprint) => {
                *digest = fingerprint;
                source_fingerprints.push(fingerprint);
            }
            Err(e) => {
                input_io_error = Some((path.clone(), e));
                break;
            }
        }
    }
    if let Some((path, e)) = input_io_error {
        return finish(
            &request,
            failed_result(
                &request,
                FailureKind::Io(format!("input {}: {}", path.display(), e)),
                started,
            ),
        );
    }
    request.id.input_hash = input_hash(
        &request.target_id,
        &request.dep_hashes,
        &source_fingerprints,
        &request.metadata,
    );

    // Steps 2-6 under the single-flight handshake.
    loop {
        if ctx.cancel.is_cancelled() {
            return finish(&request, cancelled_result(&request, started));
        }

        if let Some(entry) = ctx.cache.lookup(&request.id, unix_now_ns()) {
            match materialize_entry(ctx, &entry) {
                Ok(outputs) => {
                    let result = ActionResult {
                        id: request.id.clone(),
                        status: ActionStatus::Cached,
                        outputs,
                        stdout: Vec::new(),
                        stderr: Vec::new(),
                        duration: started.elapsed(),
                        resource_usage: ResourceUsage::default(),
                        failure: None,
                    };
                    return finish(&request, result);
                }
                Err(e) => {
                    // A hole in the object store is a miss, not a failure;
                    // fall through and rebuild the entry.
                    tracing::warn!(
                        action = %request.id,
                        error = %e,
                        "cache entry present but outputs unavailable; rebuilding"
                    );
                }
            }
        }

        match ctx.cache.begin_flight(&request.id).await {
            SingleFlight::Leader(_guard) => {
                let result = build_action(ctx, &request, started).await;
                return finish(&request, result);
            }
            SingleFlight::Waited => continue,
        }
    }
}

/// Steps 3-5: stage, execute, collect.
async fn build_action(ctx: &WorkerContext, request: &ActionRequest, started: Instant) -> ActionResult {
    let workdir = match ScopedWorkdir::create(&ctx.scratch_dir) {
        Ok(workdir) => workdir,
        Err(e) => {
            return failed_result(request, FailureKind::Io(format!("workdir: {}", e)), started)
        }
    };
    let input_paths: Vec<PathBuf> = request.inputs.iter().map(|(path, _)| path.clone()).collect();
    if let Err(e) = workdir.stage_inputs(&ctx.workspace_root, &input_paths) {
        return failed_result(request, FailureKind::Io(format!("staging: {}", e)), started);
    }
    // Declared outputs may live in subdirectories the command will not
    // create itself.
    for declared in &request.outputs {
        if let Some(parent) = declared.parent() {
            let _ = fs::create_dir_all(workdir.path().join(parent));
        }
    }

    // An empty command is a pure aggregation target: nothing runs, nothing
    // is produced, the action exists so dependents have a fingerprint.
    let command_output = if request.command.is_empty() {
        None
    } else {
        match ctx.executor.execute(request, workdir.path(), &ctx.cancel).await {
            Ok(output) if output.exit_code != 0 => {
                let mut result = failed_result(
                    request,
                    FailureKind::NonZeroExit(output.exit_code),
                    started,
                );
                result.stdout = output.stdout;
                result.stderr = output.stderr;
                return result;
            }
            Ok(output) => Some(output),
            Err(error) => return error_to_result(request, error, started),
        }
    };

    // Step 5: hash declared outputs, install into the content store, and
    // materialize into the workspace for dependents.
    let mut outputs = Vec::with_capacity(request.outputs.len());
    let mut output_files = Vec::with_capacity(request.outputs.len());
    for declared in &request.outputs {
        let built = workdir.path().join(declared);
        let hash = match hash_file(&built) {
            Ok(hash) => hash,
            Err(e) => {
                return failed_result(
                    request,
                    FailureKind::Io(format!("declared output {}: {}", declared.display(), e)),
                    started,
                );
            }
        };
        let size = fs::metadata(&built).map(|m| m.len()).unwrap_or(0);

        if let Err(e) = ctx.cache.objects().install(&built, &hash) {
            // Losing the object only costs a future rebuild.
            tracing::warn!(action = %request.id, error = %e, "failed to install output object");
        }
        let dest = ctx.workspace_root.join(declared);
        if let Some(parent) = dest.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::copy(&built, &dest) {
            return failed_result(
                request,
                FailureKind::Io(format!("installing {}: {}", declared.display(), e)),
                started,
            );
        }

        outputs.push((declared.clone(), hash));
        output_files.push(OutputFile {
            path: declared.clone(),
            hash,
            size,
        });
    }

    let (stdout, stderr) = match command_output {
        Some(output) => (output.stdout, output.stderr),
        None => (Vec::new(), Vec::new()),
    };
    let result = ActionResult {
        id: request.id.clone(),
        status: ActionStatus::Success,
        outputs,
        stdout,
        stderr,
        duration: started.elapsed(),
        resource_usage: ResourceUsage::default(),
        failure: None,
    };

    if let Err(e) = ctx
        .cache
        .store(&request.id, output_files, result.output_hash(), unix_now_ns())
    {
        // Cache trouble never fails a build that already succeeded.
        tracing::warn!(action = %request.id, error = %e, "failed to store cache entry");
    }
    result
}

/// Copy a hit's outputs from the content store back into the workspace.
fn materialize_entry(
    ctx: &WorkerContext,
    entry: &CacheEntry,
) -> Result<Vec<(PathBuf, Digest)>, BuildError> {
    let mut outputs = Vec::with_capacity(entry.outputs.len());
    for output in &entry.outputs {
        ctx.cache
            .objects()
            .materialize(&output.hash, &ctx.workspace_root.join(&output.path))?;
        outputs.push((output.path.clone(), output.hash));
    }
    Ok(outputs)
}

fn finish(request: &ActionRequest, result: ActionResult) -> ActionResult {
    ActionFinished {
        target: &request.target_id.to_string(),
        status: match result.status {
            ActionStatus::Success => "success",
            ActionStatus::Cached => "cached",
            ActionStatus::Error => "error",
            ActionStatus::Timeout => "timeout",
            ActionStatus::Cancelled => "cancelled",
        },
        duration_ms: result.duration.as_millis() as u64,
    }
    .log();
    result
}

fn failed_result(request: &ActionRequest, failure: FailureKind, started: Instant) -> ActionResult {
    ActionResult {
        id: request.id.clone(),
        status: ActionStatus::Error,
        outputs: Vec::new(),
        stdout: Vec::new(),
        stderr: Vec::new(),
        duration: started.elapsed(),
        resource_usage: ResourceUsage::default(),
        failure: Some(failure),
    }
}

fn cancelled_result(request: &ActionRequest, started: Instant) -> ActionResult {
    ActionResult {
        id: request.id.clone(),
        status: ActionStatus::Cancelled,
        outputs: Vec::new(),
        stdout: Vec::new(),
        stderr: Vec::new(),
        duration: started.elapsed(),
        resource_usage: ResourceUsage::default(),
        failure: None,
    }
}

/// Publish a `Cancelled` result for a request that never started; the pool
/// uses this to account for drained deques.
pub(crate) fn cancelled_for(request: &ActionRequest) -> ActionResult {
    cancelled_result(request, Instant::now())
}

fn error_to_result(request: &ActionRequest, error: BuildError, started: Instant) -> ActionResult {
    match error {
        BuildError::Execution(ExecutionError::Timeout { .. }) => ActionResult {
            status: ActionStatus::Timeout,
            failure: Some(FailureKind::Timeout),
            ..cancelled_result(request, started)
        },
        BuildError::Execution(ExecutionError::Cancelled) => cancelled_result(request, started),
        BuildError::Execution(ExecutionError::Signaled { signal }) => {
            failed_result(request, FailureKind::Signaled(signal), started)
        }
        BuildError::Execution(ExecutionError::NonZeroExit { code }) => {
            failed_result(request, FailureKind::NonZeroExit(code), started)
        }
        BuildError::Execution(ExecutionError::Spawn { message }) => {
            failed_result(request, FailureKind::Internal(message), started)
        }
        BuildError::Security(e) => failed_result(request, FailureKind::Security(e.to_string()), started),
        BuildError::Network(e) => failed_result(request, FailureKind::Network(e.to_string()), started),
        BuildError::Io(e) => failed_result(request, FailureKind::Io(e.to_string()), started),
        other => failed_result(request, FailureKind::Internal(other.to_string()), started),
    }
}

/// The production executor: validates the argv and runs it in array form.
pub struct ProcessExecutor {
    pub workspace_root: PathBuf,
    pub timeout: Duration,
    pub grace: Duration,
}

#[async_trait]
impl ActionExecutor for ProcessExecutor {
    async fn execute(
        &self,
        request: &ActionRequest,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, BuildError> {
        crate::exec::validate_args(&request.command, &self.workspace_root)?;
        crate::exec::validate_workdir(&self.workspace_root, workdir)?;
        let spec = CommandSpec {
            argv: &request.command,
            env: &request.env,
            cwd: workdir,
            timeout: self.timeout,
            grace: self.grace,
        };
        Ok(run_command(spec, cancel).await?)
    }
}

/// [`LanguageAdapter`] over the worker pipeline, for callers that want the
/// per-target capability interface instead of driving a scheduler.
pub struct WorkspaceAdapter {
    ctx: Arc<WorkerContext>,
    env: BTreeMap<String, String>,
}

impl WorkspaceAdapter {
    pub fn new(ctx: Arc<WorkerContext>, env: BTreeMap<String, String>) -> Self {
        Self { ctx, env }
    }
}

#[async_trait]
impl LanguageAdapter for WorkspaceAdapter {
    async fn build(&self, target: &Target, _workspace: &Path) -> Result<ActionResult, BuildError> {
        let request = plan_request(target, &self.env, Vec::new(), 0)?;
        Ok(run_action(&self.ctx, request).await)
    }

    fn outputs(&self, target: &Target, _workspace: &Path) -> Vec<PathBuf> {
        CommandAdapter
            .plan(target)
            .map(|plan| plan.outputs)
            .unwrap_or_default()
    }

    async fn needs_rebuild(&self, target: &Target, _workspace: &Path) -> bool {
        let Ok(request) = plan_request(target, &self.env, Vec::new(), 0) else {
            return true;
        };
        let mut fingerprints = Vec::with_capacity(request.inputs.len());
        for (path, _) in &request.inputs {
            match self.ctx.hasher.fingerprint(&self.ctx.workspace_root.join(path)) {
                Ok(fp) => fingerprints.push(fp),
                Err(_) => return true,
            }
        }
        !self.ctx.cache.is_cached(
            &target.id,
            request.id.action_type,
            &fingerprints,
            &request.dep_hashes,
            &request.metadata,
            unix_now_ns(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLimits;
    use crate::model::{Language, TargetId, TargetKind};
    use crate::traits::ChannelSink;
    use std::collections::BTreeSet;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Writes every declared output by upper-casing the staged inputs.
    struct UppercaseToolchain;

    #[async_trait]
    impl ActionExecutor for UppercaseToolchain {
        async fn execute(
            &self,
            request: &ActionRequest,
            workdir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<CommandOutput, BuildError> {
            let mut contents = Vec::new();
            for (input, _) in &request.inputs {
                contents.extend(fs::read(workdir.join(input))?);
            }
            contents.make_ascii_uppercase();
            for output in &request.outputs {
                fs::write(workdir.join(output), &contents)?;
            }
            Ok(CommandOutput {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration: Duration::ZERO,
            })
        }
    }

    fn context(dir: &TempDir) -> (Arc<WorkerContext>, mpsc::Receiver<ActionResult>) {
        let root = dir.path().to_path_buf();
        let (tx, rx) = mpsc::channel(16);
        let ctx = Arc::new(WorkerContext {
            scratch_dir: root.join(".scratch"),
            cache: Arc::new(
                ActionCache::open(
                    root.join(".cache"),
                    &root.to_string_lossy(),
                    CacheLimits::default(),
                    None,
                )
                .unwrap(),
            ),
            hasher: Arc::new(FileHasher::new()),
            executor: Arc::new(UppercaseToolchain),
            sink: Arc::new(ChannelSink::new(tx)),
            cancel: CancellationToken::new(),
            workspace_root: root,
        });
        (ctx, rx)
    }

    fn copy_target(name: &str) -> Target {
        let lang_config: BTreeMap<String, serde_json::Value> = [
            ("command".to_string(), serde_json::json!(["toolchain"])),
            (
                "outputs".to_string(),
                serde_json::json!([format!("out/{}.txt", name)]),
            ),
        ]
        .into_iter()
        .collect();
        Target {
            id: TargetId::new("pkg", name),
            kind: TargetKind::Custom,
            language: Language::Custom,
            sources: vec![format!("src/{}.txt", name)],
            deps: BTreeSet::new(),
            flags: vec![],
            output_path: None,
            lang_config,
        }
    }

    fn write_source(dir: &TempDir, name: &str, contents: &str) {
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join(format!("src/{}.txt", name)), contents).unwrap();
    }

    #[tokio::test]
    async fn pipeline_builds_then_hits_the_cache() {
        let dir = TempDir::new().unwrap();
        write_source(&dir, "t", "hello");
        let (ctx, _rx) = context(&dir);
        let target = copy_target("t");

        let request = plan_request(&target, &BTreeMap::new(), Vec::new(), 0).unwrap();
        let first = run_action(&ctx, request.clone()).await;
        assert_eq!(first.status, ActionStatus::Success);
        assert_eq!(
            fs::read(dir.path().join("out/t.txt")).unwrap(),
            b"HELLO"
        );

        // Same inputs: the second run is a hit and outputs rematerialize.
        fs::remove_file(dir.path().join("out/t.txt")).unwrap();
        let second = run_action(&ctx, request).await;
        assert_eq!(second.status, ActionStatus::Cached);
        assert_eq!(second.output_hash(), first.output_hash());
        assert_eq!(
            fs::read(dir.path().join("out/t.txt")).unwrap(),
            b"HELLO"
        );
    }

    #[tokio::test]
    async fn changed_source_changes_the_fingerprint() {
        let dir = TempDir::new().unwrap();
        write_source(&dir, "t", "one");
        let (ctx, _rx) = context(&dir);
        let target = copy_target("t");

        let request = plan_request(&target, &BTreeMap::new(), Vec::new(), 0).unwrap();
        let first = run_action(&ctx, request.clone()).await;
        assert_eq!(first.status, ActionStatus::Success);

        write_source(&dir, "t", "two");
        let second = run_action(&ctx, request).await;
        assert_eq!(second.status, ActionStatus::Success);
        assert_ne!(second.id.input_hash, first.id.input_hash);
        assert_eq!(fs::read(dir.path().join("out/t.txt")).unwrap(), b"TWO");
    }

    #[tokio::test]
    async fn missing_input_fails_with_a_transient_io_cause() {
        let dir = TempDir::new().unwrap();
        let (ctx, _rx) = context(&dir);
        let target = copy_target("ghost");

        let request = plan_request(&target, &BTreeMap::new(), Vec::new(), 0).unwrap();
        let result = run_action(&ctx, request).await;
        assert_eq!(result.status, ActionStatus::Error);
        assert!(matches!(result.failure, Some(FailureKind::Io(_))));
    }

    #[tokio::test]
    async fn workspace_adapter_reports_rebuild_state() {
        let dir = TempDir::new().unwrap();
        write_source(&dir, "t", "adapter");
        let (ctx, _rx) = context(&dir);
        let target = copy_target("t");
        let adapter = WorkspaceAdapter::new(Arc::clone(&ctx), BTreeMap::new());

        assert!(adapter.needs_rebuild(&target, dir.path()).await);
        let result = adapter.build(&target, dir.path()).await.unwrap();
        assert_eq!(result.status, ActionStatus::Success);
        assert!(!adapter.needs_rebuild(&target, dir.path()).await);
        assert_eq!(
            adapter.outputs(&target, dir.path()),
            vec![PathBuf::from("out/t.txt")]
        );
    }
}
