// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end scheduler scenarios: diamond builds, full-cache rebuilds,
//! incremental touches, wide parallel waves, failure containment, and
//! cache corruption recovery.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::cache::{ActionCache, CacheLimits};
use crate::engine::{BuildReport, Scheduler, SchedulerOptions};
use crate::errors::{BuildError, FailurePolicy};
use crate::exec::CommandOutput;
use crate::graph::{BuildStatus, DependencyGraph};
use crate::hash::FileHasher;
use crate::model::{ActionRequest, Language, Target, TargetId, TargetKind};
use crate::traits::ActionExecutor;

/// Test executor: "compiles" by concatenating the target name, the staged
/// inputs, and the dependency hashes into each declared output. Counts
/// invocations so tests can assert that cached actions run no commands,
/// and tracks concurrent entries for the parallelism scenario.
struct FakeToolchain {
    calls: AtomicU32,
    running: AtomicI32,
    max_running: AtomicI32,
    /// Target names that exit nonzero.
    fail: Vec<String>,
    /// Simulated per-action work time.
    work: Duration,
}

impl FakeToolchain {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            running: AtomicI32::new(0),
            max_running: AtomicI32::new(0),
            fail: Vec::new(),
            work: Duration::ZERO,
        }
    }

    fn failing(names: &[&str]) -> Self {
        Self {
            fail: names.iter().map(|s| s.to_string()).collect(),
            ..Self::new()
        }
    }

    fn with_work(work: Duration) -> Self {
        Self {
            work,
            ..Self::new()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_concurrency(&self) -> i32 {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for FakeToolchain {
    async fn execute(
        &self,
        request: &ActionRequest,
        workdir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(&request.target_id.name) {
            return Ok(CommandOutput {
                exit_code: 1,
                stdout: Vec::new(),
                stderr: b"simulated toolchain failure".to_vec(),
                duration: Duration::ZERO,
            });
        }

        for output in &request.outputs {
            let mut contents = format!("{}\n", request.target_id).into_bytes();
            for (input, _) in &request.inputs {
                contents.extend(fs::read(workdir.join(input)).map_err(BuildError::Io)?);
            }
            for dep in &request.dep_hashes {
                contents.extend(dep.to_string().into_bytes());
            }
            let dest = workdir.join(output);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(BuildError::Io)?;
            }
            fs::write(&dest, contents).map_err(BuildError::Io)?;
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration: Duration::ZERO,
        })
    }
}

fn make_target(name: &str, deps: &[&str]) -> Target {
    let lang_config: BTreeMap<String, serde_json::Value> = [
        (
            "command".to_string(),
            serde_json::json!(["fake-toolchain", name]),
        ),
        (
            "outputs".to_string(),
            serde_json::json!([format!("out/{}.out", name)]),
        ),
    ]
    .into_iter()
    .collect();

    Target {
        id: TargetId::new("pkg", name),
        kind: TargetKind::Library,
        language: Language::Custom,
        sources: vec![format!("src/{}.txt", name)],
        deps: deps.iter().map(|d| TargetId::new("pkg", *d)).collect::<BTreeSet<_>>(),
        flags: vec![],
        output_path: None,
        lang_config,
    }
}

fn build_graph(targets: Vec<Target>) -> Arc<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    let specs: Vec<(TargetId, BTreeSet<TargetId>)> = targets
        .iter()
        .map(|t| (t.id.clone(), t.deps.clone()))
        .collect();
    for target in targets {
        graph.add_target(target).unwrap();
    }
    for (id, deps) in specs {
        for dep in deps {
            graph.add_dependency(&id, &dep).unwrap();
        }
    }
    Arc::new(graph)
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(targets: &[Target]) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        for target in targets {
            for source in &target.sources {
                fs::write(
                    dir.path().join(source),
                    format!("contents of {}\n", source),
                )
                .unwrap();
            }
        }
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn open_cache(&self) -> Arc<ActionCache> {
        Arc::new(
            ActionCache::open(
                self.root().join(".sawmill").join("cache"),
                &self.root().to_string_lossy(),
                CacheLimits::default(),
                None,
            )
            .unwrap(),
        )
    }

    fn scheduler(
        &self,
        graph: Arc<DependencyGraph>,
        cache: Arc<ActionCache>,
        toolchain: Arc<FakeToolchain>,
        policy: FailurePolicy,
    ) -> Scheduler {
        let options = SchedulerOptions {
            max_workers: 4,
            failure_policy: policy,
            max_retry_attempts: 0,
            ..SchedulerOptions::default()
        };
        Scheduler::new(
            graph,
            self.root(),
            cache,
            BTreeMap::new(),
            options,
        )
        .with_executor(toolchain)
    }
}

fn names(ids: &[TargetId]) -> Vec<String> {
    let mut names: Vec<String> = ids.iter().map(|id| id.name.clone()).collect();
    names.sort();
    names
}

fn failed_names(report: &BuildReport) -> Vec<String> {
    let mut names: Vec<String> = report.failed.iter().map(|(id, _)| id.name.clone()).collect();
    names.sort();
    names
}

fn diamond_targets() -> Vec<Target> {
    vec![
        make_target("a", &["b", "c"]),
        make_target("b", &["d"]),
        make_target("c", &["d"]),
        make_target("d", &[]),
    ]
}

#[tokio::test]
async fn diamond_builds_in_dependency_waves() {
    let targets = diamond_targets();
    let workspace = Workspace::new(&targets);
    let graph = build_graph(targets);

    let waves = graph.wave_schedule().unwrap();
    let wave_names: Vec<Vec<String>> = waves
        .iter()
        .map(|w| w.iter().map(|&n| graph.node(n).target.id.name.clone()).collect())
        .collect();
    assert_eq!(wave_names, vec![vec!["d"], vec!["b", "c"], vec!["a"]]);

    let toolchain = Arc::new(FakeToolchain::new());
    let scheduler = workspace.scheduler(
        Arc::clone(&graph),
        workspace.open_cache(),
        Arc::clone(&toolchain),
        FailurePolicy::FailFast,
    );
    let report = scheduler.run().await.unwrap();

    assert!(report.success());
    assert_eq!(names(&report.built), vec!["a", "b", "c", "d"]);
    assert_eq!(toolchain.calls(), 4);
    assert!(workspace.root().join("out/a.out").is_file());
}

#[tokio::test]
async fn unchanged_rebuild_is_fully_cached_and_runs_nothing() {
    let targets = diamond_targets();
    let workspace = Workspace::new(&targets);

    let first = Arc::new(FakeToolchain::new());
    let scheduler = workspace.scheduler(
        build_graph(diamond_targets()),
        workspace.open_cache(),
        Arc::clone(&first),
        FailurePolicy::FailFast,
    );
    assert!(scheduler.run().await.unwrap().success());
    assert_eq!(first.calls(), 4);

    // Fresh graph, fresh cache handle re-read from disk, fresh hasher:
    // everything must come back from the cache without a single command.
    let second = Arc::new(FakeToolchain::new());
    let scheduler = workspace.scheduler(
        build_graph(diamond_targets()),
        workspace.open_cache(),
        Arc::clone(&second),
        FailurePolicy::FailFast,
    );
    let report = scheduler.run().await.unwrap();

    assert_eq!(names(&report.cached), vec!["a", "b", "c", "d"]);
    assert!(report.built.is_empty());
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn cycle_insertion_is_rejected_and_graph_left_usable() {
    let mut graph = DependencyGraph::new();
    graph.add_target(make_target("a", &[])).unwrap();
    graph.add_target(make_target("b", &[])).unwrap();
    let a = TargetId::new("pkg", "a");
    let b = TargetId::new("pkg", "b");

    graph.add_dependency(&a, &b).unwrap();
    let err = graph.add_dependency(&b, &a).unwrap_err();
    assert!(matches!(err, crate::errors::GraphError::CycleDetected { .. }));

    // The failed insertion left no residue: the graph still orders.
    let order = graph.topological_order().unwrap();
    assert_eq!(order.len(), 2);
}

#[tokio::test]
async fn touched_but_identical_leaf_recomputes_one_hash_and_stays_cached() {
    // Chain a -> b -> c -> d -> e; e is the leaf.
    let targets = vec![
        make_target("a", &["b"]),
        make_target("b", &["c"]),
        make_target("c", &["d"]),
        make_target("d", &["e"]),
        make_target("e", &[]),
    ];
    let chain = || {
        vec![
            make_target("a", &["b"]),
            make_target("b", &["c"]),
            make_target("c", &["d"]),
            make_target("d", &["e"]),
            make_target("e", &[]),
        ]
    };
    let workspace = Workspace::new(&targets);
    let cache = workspace.open_cache();
    let hasher = Arc::new(FileHasher::new());

    let first = Arc::new(FakeToolchain::new());
    let scheduler = workspace
        .scheduler(
            build_graph(chain()),
            Arc::clone(&cache),
            Arc::clone(&first),
            FailurePolicy::FailFast,
        )
        .with_hasher(Arc::clone(&hasher));
    assert!(scheduler.run().await.unwrap().success());
    assert_eq!(hasher.content_recomputations(), 5);

    // Touch the leaf's source: same bytes, newer mtime.
    let leaf = workspace.root().join("src/e.txt");
    let contents = fs::read(&leaf).unwrap();
    fs::write(&leaf, &contents).unwrap();
    let file = fs::File::options().write(true).open(&leaf).unwrap();
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(5))
        .unwrap();
    drop(file);

    let second = Arc::new(FakeToolchain::new());
    let scheduler = workspace
        .scheduler(
            build_graph(chain()),
            Arc::clone(&cache),
            Arc::clone(&second),
            FailurePolicy::FailFast,
        )
        .with_hasher(Arc::clone(&hasher));
    let report = scheduler.run().await.unwrap();

    // Exactly one content hash recomputed (the touched leaf), and since
    // the bytes are identical every fingerprint is unchanged: all five
    // report cached and no command runs.
    assert_eq!(hasher.content_recomputations(), 6);
    assert_eq!(report.cached.len(), 5);
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn hundred_independent_targets_run_in_one_wave_bounded_by_workers() {
    let targets: Vec<Target> = (0..100)
        .map(|i| make_target(&format!("t{:03}", i), &[]))
        .collect();
    let workspace = Workspace::new(&targets);
    let graph = build_graph(targets);

    assert_eq!(graph.wave_schedule().unwrap().len(), 1);

    let toolchain = Arc::new(FakeToolchain::with_work(Duration::from_millis(5)));
    let scheduler = workspace.scheduler(
        Arc::clone(&graph),
        workspace.open_cache(),
        Arc::clone(&toolchain),
        FailurePolicy::FailFast,
    );
    let report = scheduler.run().await.unwrap();

    assert_eq!(report.built.len(), 100);
    assert_eq!(toolchain.calls(), 100);
    // min(100, 4) workers: never more than the pool, and under load the
    // pool saturates.
    assert!(toolchain.max_concurrency() <= 4);
    assert_eq!(toolchain.max_concurrency(), 4);
}

#[tokio::test]
async fn failure_in_a_chain_skips_dependents_and_keeps_upstream() {
    for policy in [FailurePolicy::FailFast, FailurePolicy::KeepGoing] {
        // a depends on b depends on c; b fails.
        let targets = vec![
            make_target("a", &["b"]),
            make_target("b", &["c"]),
            make_target("c", &[]),
        ];
        let workspace = Workspace::new(&targets);
        let graph = build_graph(targets);

        let toolchain = Arc::new(FakeToolchain::failing(&["b"]));
        let scheduler = workspace.scheduler(
            Arc::clone(&graph),
            workspace.open_cache(),
            toolchain,
            policy,
        );
        let report = scheduler.run().await.unwrap();

        assert_eq!(names(&report.built), vec!["c"], "policy {:?}", policy);
        assert_eq!(failed_names(&report), vec!["b"], "policy {:?}", policy);
        assert_eq!(names(&report.skipped), vec!["a"], "policy {:?}", policy);

        let status_of = |name: &str| {
            graph
                .node(graph.lookup(&TargetId::new("pkg", name)).unwrap())
                .status()
        };
        assert_eq!(status_of("c"), BuildStatus::Built);
        assert_eq!(status_of("b"), BuildStatus::Failed);
        assert_eq!(status_of("a"), BuildStatus::Skipped);
    }
}

#[tokio::test]
async fn keep_going_builds_independent_branches_past_a_failure() {
    // Two branches: bad -> dead_end, good -> leaf. The bad branch fails,
    // the good branch still completes.
    let targets = vec![
        make_target("dead_end", &["bad"]),
        make_target("bad", &[]),
        make_target("good", &["leaf"]),
        make_target("leaf", &[]),
    ];
    let workspace = Workspace::new(&targets);
    let graph = build_graph(targets);

    let toolchain = Arc::new(FakeToolchain::failing(&["bad"]));
    let scheduler = workspace.scheduler(
        Arc::clone(&graph),
        workspace.open_cache(),
        toolchain,
        FailurePolicy::KeepGoing,
    );
    let report = scheduler.run().await.unwrap();

    assert_eq!(names(&report.built), vec!["good", "leaf"]);
    assert_eq!(failed_names(&report), vec!["bad"]);
    assert_eq!(names(&report.skipped), vec!["dead_end"]);
}

#[tokio::test]
async fn corrupted_entry_file_rebuilds_only_the_damaged_target() {
    let targets = diamond_targets();
    let workspace = Workspace::new(&targets);

    let first = Arc::new(FakeToolchain::new());
    let cache = workspace.open_cache();
    let entries_path = cache.entries_path();
    let scheduler = workspace.scheduler(
        build_graph(diamond_targets()),
        cache,
        Arc::clone(&first),
        FailurePolicy::FailFast,
    );
    assert!(scheduler.run().await.unwrap().success());
    assert_eq!(first.calls(), 4);

    // Flip the 17th byte: the first persisted entry's framing.
    let mut bytes = fs::read(&entries_path).unwrap();
    bytes[16] ^= 0xff;
    fs::write(&entries_path, &bytes).unwrap();

    let second = Arc::new(FakeToolchain::new());
    let reopened = workspace.open_cache();
    assert_eq!(reopened.stats().integrity_rejects, 1);
    let scheduler = workspace.scheduler(
        build_graph(diamond_targets()),
        reopened,
        Arc::clone(&second),
        FailurePolicy::FailFast,
    );
    let report = scheduler.run().await.unwrap();

    // Exactly one target lost its entry; the other three stay cached.
    assert!(report.success());
    assert_eq!(second.calls(), 1);
    assert_eq!(report.built.len(), 1);
    assert_eq!(report.cached.len(), 3);
}

#[tokio::test]
async fn peer_stealing_executes_every_action_exactly_once() {
    // A wide wave with the steal engine enabled: whatever gets stolen,
    // rebalanced, or raced must still execute exactly once per target.
    let targets: Vec<Target> = (0..40)
        .map(|i| make_target(&format!("t{:02}", i), &[]))
        .collect();
    let workspace = Workspace::new(&targets);
    let graph = build_graph(targets);

    let toolchain = Arc::new(FakeToolchain::with_work(Duration::from_millis(2)));
    let options = SchedulerOptions {
        max_workers: 4,
        failure_policy: FailurePolicy::FailFast,
        max_retry_attempts: 0,
        steal: Some(crate::steal::StealSettings {
            strategy: crate::steal::VictimStrategy::PowerOfTwo,
            steal_timeout_ms: 100,
            max_retries: 1,
            backoff_base_ms: 1,
        }),
        ..SchedulerOptions::default()
    };
    let scheduler = Scheduler::new(
        Arc::clone(&graph),
        workspace.root(),
        workspace.open_cache(),
        BTreeMap::new(),
        options,
    )
    .with_executor(Arc::clone(&toolchain) as Arc<dyn ActionExecutor>);

    let report = scheduler.run().await.unwrap();
    assert!(report.success());
    assert_eq!(report.built.len(), 40);
    // At-most-once: 40 targets, 40 command executions, no replays.
    assert_eq!(toolchain.calls(), 40);
}

#[tokio::test]
async fn cancellation_stops_the_run_without_leaking_scratch_dirs() {
    let targets: Vec<Target> = (0..16)
        .map(|i| make_target(&format!("t{:02}", i), &[]))
        .collect();
    let workspace = Workspace::new(&targets);
    let graph = build_graph(targets);

    let toolchain = Arc::new(FakeToolchain::with_work(Duration::from_millis(50)));
    let scheduler = workspace.scheduler(
        Arc::clone(&graph),
        workspace.open_cache(),
        toolchain,
        FailurePolicy::FailFast,
    );

    let cancel = scheduler.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let report = scheduler.run().await.unwrap();

    // Some targets never ran; everything is accounted for one way or
    // another and nothing is left mid-flight.
    assert!(graph.is_terminal());
    assert_eq!(
        report.built.len() + report.failed.len() + report.skipped.len(),
        16
    );

    // Scoped workdirs released on every exit path.
    let scratch = workspace.root().join(".sawmill").join("scratch");
    if scratch.is_dir() {
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
