// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use sawmill::cache::ActionCache;
use sawmill::config::{load_and_validate_config, WorkspaceConfig};
use sawmill::engine::Scheduler;

const DEFAULT_CONFIG: &str = "sawmill.yaml";

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <build|clean|graph> [{}]", program, DEFAULT_CONFIG);
    eprintln!();
    eprintln!("  build   Build every target in the workspace");
    eprintln!("  clean   Drop the action cache for the workspace");
    eprintln!("  graph   Print the dependency graph as execution waves");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }
    let command = args[1].as_str();
    let config_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_CONFIG);

    let outcome = match command {
        "build" => run_build(config_path).await,
        "clean" => run_clean(config_path),
        "graph" => run_graph(config_path),
        _ => usage(&args[0]),
    };

    match outcome {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    }
}

fn load_workspace(config_path: &str) -> anyhow::Result<(WorkspaceConfig, PathBuf)> {
    let config = load_and_validate_config(config_path)
        .with_context(|| format!("failed to load {}", config_path))?;
    let root = Path::new(config_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let root = root
        .canonicalize()
        .with_context(|| format!("failed to resolve workspace root {}", root.display()))?;
    Ok((config, root))
}

fn open_cache(config: &WorkspaceConfig, root: &Path) -> anyhow::Result<Arc<ActionCache>> {
    let cache = ActionCache::open(
        config.cache_dir(root),
        &root.to_string_lossy(),
        config.cache_limits(),
        Some(Box::new(config.eviction_policy())),
    )
    .context("failed to open action cache")?;
    Ok(Arc::new(cache))
}

async fn run_build(config_path: &str) -> anyhow::Result<i32> {
    let started = Instant::now();
    let (config, root) = load_workspace(config_path)?;
    let graph = Arc::new(config.build_graph()?);
    let cache = open_cache(&config, &root)?;

    println!("🔨 Building {} targets from {}", graph.len(), config_path);

    let env: BTreeMap<String, String> = config.env.clone();
    let scheduler = Scheduler::new(graph, &root, cache, env, config.scheduler_options());
    let report = scheduler.run().await?;

    println!();
    println!("📊 Build finished in {:?}", started.elapsed());
    println!(
        "   {} built, {} cached, {} failed, {} skipped",
        report.built.len(),
        report.cached.len(),
        report.failed.len(),
        report.skipped.len()
    );
    for (target, cause) in &report.failed {
        eprintln!("❌ {}: {}", target, cause);
    }
    Ok(if report.success() { 0 } else { 1 })
}

fn run_clean(config_path: &str) -> anyhow::Result<i32> {
    let (config, root) = load_workspace(config_path)?;
    let cache = open_cache(&config, &root)?;
    let stats = cache.stats();
    cache.clear().context("failed to clear cache")?;
    println!(
        "🧹 Cleared {} cache entries ({} bytes) under {}",
        stats.entries,
        stats.bytes,
        config.cache_dir(&root).display()
    );
    Ok(0)
}

fn run_graph(config_path: &str) -> anyhow::Result<i32> {
    let (config, _root) = load_workspace(config_path)?;
    let graph = config.build_graph()?;
    let waves = graph.wave_schedule()?;

    println!("Execution waves for {} targets:", graph.len());
    for (index, wave) in waves.iter().enumerate() {
        println!("  wave {}:", index);
        for &node in wave {
            let node = graph.node(node);
            let deps: Vec<String> = node
                .target
                .deps
                .iter()
                .map(|d| d.to_string())
                .collect();
            if deps.is_empty() {
                println!("    {}", node.target.id);
            } else {
                println!("    {} (deps: {})", node.target.id, deps.join(", "));
            }
        }
    }
    Ok(0)
}
