use anyhow::{Context, Result, anyhow};
use console::style;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use toolhub_core::tools::ToolHealth;
use toolhub_core::{InvocationOptions, InvocationRequest, InvocationResult, Toolhub};

pub struct InvokeOptions {
    pub use_cache: bool,
    pub validate: bool,
    pub stream: bool,
    pub timeout: Option<u64>,
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn health(hub: &Toolhub, name: Option<&str>, json: bool) -> Result<()> {
    let registry = hub.registry();

    if let Some(name) = name {
        if registry.descriptor(name).is_none() {
            return Err(anyhow!("unknown tool '{name}'"));
        }
        registry.resolve(name);
        let health = registry.tool_health(name);
        if json {
            return print_json(&health);
        }
        match health {
            ToolHealth::Available => println!("{} {}", style("available").green().bold(), name),
            ToolHealth::Unavailable(record) => {
                println!("{} {}", style("unavailable").red().bold(), name);
                println!("  type:    {}", record.error_kind);
                println!("  error:   {}", record.error_message);
                if let Some(package) = &record.missing_dependency {
                    println!("  missing: {package}");
                }
                println!("  hint:    {}", style(record.remediation_hint()).dim());
            }
            ToolHealth::Unknown => println!("{} {}", style("unknown").yellow(), name),
        }
        return Ok(());
    }

    let report = registry.warm_up();
    if json {
        return print_json(&report);
    }
    println!(
        "{} {}/{} tools available",
        style("toolhub:").cyan().bold(),
        report.available,
        report.total
    );
    for (tool, record) in &report.failures {
        let missing = record
            .missing_dependency
            .as_deref()
            .map(|package| format!(" (missing {package})"))
            .unwrap_or_default();
        println!(
            "  {} {} [{}] {}{}",
            style("x").red(),
            tool,
            record.error_kind,
            record.error_message,
            missing
        );
    }
    Ok(())
}

pub async fn find(hub: &Toolhub, query: &str, limit: Option<usize>, json: bool) -> Result<()> {
    if query.trim().is_empty() {
        return Err(anyhow!("a query is required"));
    }
    if hub.engine().collection(hub.finder().collection()).await.is_none() {
        hub.index_tools().await?;
    }

    let matches = hub
        .finder()
        .find(query, limit)
        .await
        .context("Tool search failed")?;
    if json {
        return print_json(&matches);
    }
    if matches.is_empty() {
        println!("{}", style("no matching tools").dim());
        return Ok(());
    }
    for found in matches {
        println!(
            "{:>6.3}  {}  {}",
            found.score,
            style(&found.name).bold(),
            style(&found.description).dim()
        );
    }
    Ok(())
}

pub async fn invoke(
    hub: &Toolhub,
    name: &str,
    raw_args: &str,
    options: InvokeOptions,
    json: bool,
) -> Result<()> {
    let arguments: Value =
        serde_json::from_str(raw_args).with_context(|| format!("--args is not valid JSON: {raw_args}"))?;

    let mut invocation = InvocationOptions::default()
        .with_cache(options.use_cache)
        .with_validation(options.validate);
    if let Some(secs) = options.timeout {
        invocation = invocation.with_timeout(Duration::from_secs(secs));
    }

    let printer = if options.stream {
        let (tx, mut rx) = mpsc::channel::<Value>(64);
        invocation = invocation.with_stream(tx);
        Some(tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                eprintln!("{} {chunk}", style("chunk").dim());
            }
        }))
    } else {
        None
    };

    let result = hub
        .invoke(InvocationRequest::new(name, arguments).with_options(invocation))
        .await;
    if let Some(printer) = printer {
        // the executor drops its sender once the call completes
        let _ = printer.await;
    }

    if json {
        return print_json(&result.to_json());
    }
    match result {
        InvocationResult::Success { value, metadata } => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            let mut notes = vec![format!("{}ms", metadata.duration_ms)];
            if metadata.cached {
                notes.push("cached".into());
            }
            if let Some(rule) = metadata.hook_applied {
                notes.push(format!("hook {rule}"));
            }
            eprintln!("{} {}", style("ok").green().bold(), style(notes.join(", ")).dim());
            Ok(())
        }
        InvocationResult::Failure(error) => {
            eprintln!("{} {}", style(error.error_type).red().bold(), error.message);
            eprintln!("  {}", style(&error.remediation_hint).dim());
            Err(anyhow!(error.legacy_message()))
        }
    }
}

pub async fn index(hub: &Toolhub, json: bool) -> Result<()> {
    let report = hub.index_tools().await?;
    if json {
        return print_json(&report);
    }
    println!(
        "{} indexed {} tools ({} new, {} updated, {} unchanged)",
        style("toolhub:").cyan().bold(),
        hub.registry().catalog().len(),
        report.inserted,
        report.updated,
        report.unchanged
    );
    if report.missing_vectors > 0 {
        println!(
            "  {} {} tools without embeddings; discovery uses keywords for them",
            style("!").yellow(),
            report.missing_vectors
        );
    }
    Ok(())
}
