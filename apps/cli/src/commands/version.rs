//! `handler version`.

/// Prints the version and every registered task.
pub fn execute() -> anyhow::Result<()> {
    println!("handler {}", env!("CARGO_PKG_VERSION"));
    for library in handler_tasks::default_registry()?.libraries() {
        println!("  {}: {}", library.name, library.tasks.join(", "));
    }
    Ok(())
}
