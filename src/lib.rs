// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod plugins;
pub mod resource;
pub mod scheduler;
pub mod stack;
pub mod store;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_from_path;
use crate::config::model::Template;
use crate::dag::DependencyGraph;
use crate::engine::{Engine, ProviderCache};
use crate::resource::TypeRegistry;
use crate::store::{MemoryStore, StackId};
use crate::types::ConcurrentActionBehaviour;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - template loading and validation
/// - the type registry with the built-in resource types
/// - an in-memory store and the engine
/// - the requested stack create (and optional teardown)
pub async fn run(args: CliArgs) -> Result<()> {
    let mut raw = load_from_path(&args.template)?;
    if args.no_rollback {
        raw.config.disable_rollback = true;
    }
    let template = Template::try_from(raw)?;

    if args.dry_run {
        print_dry_run(&template)?;
        return Ok(());
    }

    let behaviour = if args.reject_concurrent {
        ConcurrentActionBehaviour::Reject
    } else {
        ConcurrentActionBehaviour::Queue
    };

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        Arc::new(TypeRegistry::with_builtins()),
        store,
        Arc::new(ProviderCache::default()),
    )
    .with_behaviour(behaviour);

    let id = engine.create_stack(&args.name, template).await?;
    print_stack(&engine, id)?;

    if args.teardown {
        info!(stack = %args.name, "tearing down");
        engine.delete_stack(id).await?;
        match engine.describe_stack(id) {
            // Still stored: the delete did not finish.
            Ok(summary) => println!("\nteardown: {} ({})", summary.state(), summary.status_reason),
            Err(_) => println!("\nteardown: stack {} deleted", args.name),
        }
    }

    Ok(())
}

/// Stack state, resource states and the event log.
fn print_stack(engine: &Engine, id: StackId) -> Result<()> {
    let summary = engine.describe_stack(id)?;
    println!("stack {} ({})", summary.name, summary.id);
    println!("  status: {}", summary.state());
    println!("  reason: {}", summary.status_reason);
    println!();

    println!("resources ({}):", summary.resource_count);
    for resource in engine.list_resources(id)? {
        println!(
            "  - {} [{}] {}_{}",
            resource.name, resource.resource_type, resource.action, resource.status
        );
        if let Some(ref physical) = resource.resource_id {
            println!("      id: {physical}");
        }
        if !resource.status_reason.is_empty() {
            println!("      reason: {}", resource.status_reason);
        }
    }
    println!();

    println!("events:");
    for event in engine.stack_events(id)? {
        println!(
            "  {} {} {}_{} {}",
            event.timestamp.format("%H:%M:%S%.3f"),
            event.resource_name,
            event.action,
            event.status,
            event.reason
        );
    }
    Ok(())
}

/// Print resources and the create/delete orders without running anything.
fn print_dry_run(template: &Template) -> Result<()> {
    let config = template.config();
    println!("stackdag dry-run");
    println!("  config.poll_interval_ms = {}", config.poll_interval_ms);
    if let Some(timeout) = config.timeout_secs {
        println!("  config.timeout_secs = {timeout}");
    }
    println!("  config.disable_rollback = {}", config.disable_rollback);
    println!("  config.max_concurrency = {}", config.max_concurrency);
    println!();

    println!("resources ({}):", template.len());
    for resource in template.resources() {
        println!("  - {} [{}]", resource.name, resource.resource_type);
        let refs = resource.references();
        if !refs.is_empty() {
            println!("      depends on: {refs:?}");
        }
        if let Some(timeout) = resource.timeout_secs {
            println!("      timeout_secs: {timeout}");
        }
    }
    println!();

    let graph = DependencyGraph::from_template(template);
    let forward: Vec<&str> = graph.forward_order()?.collect();
    let reverse: Vec<&str> = graph.reverse_order()?.collect();
    println!("create order: {}", forward.join(" -> "));
    println!("delete order: {}", reverse.join(" -> "));

    debug!("dry-run complete (nothing executed)");
    Ok(())
}
