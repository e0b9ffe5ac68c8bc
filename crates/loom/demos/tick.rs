//! Example: a host loop driving Loom
//!
//! Binds a few expressions, mutates the scope between ticks and prints what
//! each listener sees. Run with `RUST_LOG=loom_reactive=debug` for the
//! detector's own logging.

use loom::{Config, Engine, IterableDiffer, Operation, Strategy};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut engine = Engine::new(Config::default())?;
    let root = engine.root_node();
    let scope = engine.root_scope();
    println!("Loom v{} initialized", loom::VERSION);

    engine.evaluate("#user = { first: 'Ada', last: 'Lovelace' }; #todos = ['write notes']", scope)?;

    engine.bind("user.first + ' ' + user.last | uppercase", root, |ctx| {
        println!("  header  -> {}", ctx.value().unwrap_or_default());
    })?;

    // the list lives in its own child node, refreshed on demand
    let list = engine.create_child(root, Strategy::SkipUnlessForced)?;
    let todos = engine.scopes().resolve(scope, "todos");
    let mut differ = IterableDiffer::with_identity(&todos)?;
    differ.diff(&todos)?;
    engine.bind("todos", list, move |ctx| {
        let todos = ctx.value().unwrap_or_default();
        let Ok(Some(ops)) = differ.diff(&todos) else {
            return;
        };
        for op in ops {
            match op {
                Operation::Add { key, value } => println!("  row {key} + {value}"),
                Operation::Update { key, value, previous } => println!("  row {key} ~ {previous} -> {value}"),
                Operation::Remove { key, previous } => println!("  row {key} - {previous}"),
                Operation::RemapKey { from, to } => println!("  row {from} moved to {to}"),
            }
        }
    })?;

    let steps: &[(&str, &str)] = &[
        ("rename", "user.first = 'Augusta'"),
        ("nothing changed", "user"),
        ("add todo", "todos.push('review proofs')"),
        ("reorder", "#todos = ['review proofs', 'write notes']"),
    ];
    for (label, mutation) in steps {
        println!("{label}: {mutation}");
        engine.evaluate(mutation, scope)?;
        let ticked = engine.tick()?;
        let refreshed = engine.refresh(list)?;
        println!("  ({} listener calls)", ticked.listeners_invoked + refreshed.listeners_invoked);
    }

    Ok(())
}
