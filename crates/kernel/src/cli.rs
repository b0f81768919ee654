//! CLI command implementations.
//!
//! Each command runs against an already-built [`Runtime`] and prints a
//! plain-text table or summary to stdout.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::jobs::{JobRun, RunOutcome};
use crate::runtime::Runtime;

/// Reconcile plugin state and summarise what changed.
pub async fn cmd_reconcile(runtime: &Runtime) -> Result<()> {
    let report = runtime.start().await?;

    println!("Configured: {}", join_or_none(&report.plan.configured));
    println!("Installed:  {}", join_or_none(&report.installed));
    println!("Enabled:    {}", join_or_none(&report.enabled));
    println!("Disabled:   {}", join_or_none(&report.disabled));
    if !report.disable_skipped.is_empty() {
        println!(
            "Dropped without disable hook: {}",
            report.disable_skipped.join(", ")
        );
    }
    for upgrade in report.upgrades.iter().filter(|u| !u.is_noop()) {
        println!(
            "Upgraded {} from {} to {} ({} step(s))",
            upgrade.plugin,
            upgrade.from_version,
            upgrade.to_version,
            upgrade.applied.len()
        );
    }
    Ok(())
}

/// List configured plugins with their persisted status.
pub async fn cmd_plugin_list(runtime: &Runtime) -> Result<()> {
    let statuses = runtime.plugin_status().await?;
    if statuses.is_empty() {
        println!("No plugins configured.");
        return Ok(());
    }

    println!(
        "{:<44} {:<10} {:<8} {:<7}",
        "PLUGIN", "INSTALLED", "ENABLED", "SCHEMA"
    );
    println!("{}", "-".repeat(72));
    for status in &statuses {
        println!(
            "{:<44} {:<10} {:<8} {}",
            status.name,
            yes_no(status.installed),
            yes_no(status.enabled),
            status.schema_version
        );
    }
    Ok(())
}

/// List routes and tasks declared by plugins during setup.
pub fn cmd_plugin_routes(runtime: &Runtime) -> Result<()> {
    let host = runtime.host();
    if host.routes().is_empty() && host.tasks().is_empty() {
        println!("No routes or tasks declared.");
        return Ok(());
    }

    println!("{:<7} {:<50} {}", "METHOD", "PATH", "PLUGIN");
    println!("{}", "-".repeat(96));
    for route in host.routes() {
        println!("{:<7} {:<50} {}", route.method, route.path, route.plugin);
    }

    if !host.tasks().is_empty() {
        println!();
        println!("{:<58} {}", "TASK", "PLUGIN");
        println!("{}", "-".repeat(96));
        for task in host.tasks() {
            println!("{:<58} {}", task.reference, task.plugin);
        }
    }
    Ok(())
}

pub async fn cmd_plugin_uninstall(runtime: &Runtime, name: &str) -> Result<()> {
    let callback_ran = runtime
        .uninstall_plugin(name)
        .await
        .with_context(|| format!("failed to uninstall '{name}'"))?;
    if callback_ran {
        println!("Plugin '{name}' uninstalled.");
    } else {
        println!("Plugin '{name}' is no longer available; removed its records only.");
    }
    Ok(())
}

/// Create a job, optionally running it straight away.
pub async fn cmd_job_create(
    runtime: &Runtime,
    runner: &str,
    args: &[String],
    kwargs: &[String],
    run: bool,
) -> Result<()> {
    let args = parse_args(args);
    let kwargs = parse_kwargs(kwargs)?;

    if run {
        let handle = runtime.jobs().apply_async(runner, args, kwargs).await?;
        println!("Job {} dispatched.", handle.id());
    } else {
        let job_id = runtime.jobs().create_job(runner, args, kwargs).await?;
        println!("Job {job_id} created.");
    }
    Ok(())
}

/// Run an existing job in this process.
pub async fn cmd_job_run(runtime: &Runtime, job_id: Uuid) -> Result<()> {
    let outcome = runtime.jobs().start_job(job_id).await?;
    print_outcome(&outcome);
    if !outcome.success {
        bail!("job {job_id} failed");
    }
    Ok(())
}

pub async fn cmd_job_show(runtime: &Runtime, job_id: Uuid) -> Result<()> {
    let jobs = runtime.jobs();
    let job = jobs.get_job_def(job_id).await?;
    let status = jobs.get_job_status(job_id).await?;

    println!("Job:     {}", job.id);
    println!("Runner:  {}", job.runner);
    println!("Created: {}", job.ctime.to_rfc3339());
    println!("Args:    {}", Value::Array(job.args));
    println!("Kwargs:  {}", Value::Object(job.kwargs));
    println!("Status:  {status}");
    Ok(())
}

pub async fn cmd_job_runs(runtime: &Runtime, job_id: Uuid) -> Result<()> {
    let runs = runtime.jobs().list_job_runs(job_id).await?;
    if runs.is_empty() {
        println!("Job {job_id} has not run.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10} {:<25} {:<25} {}",
        "RUN", "STATE", "STARTED", "ENDED", "PROGRESS"
    );
    println!("{}", "-".repeat(110));
    for run in &runs {
        println!(
            "{:<36}  {:<10} {:<25} {:<25} {}",
            run.id,
            run.state(),
            run.start_time.to_rfc3339(),
            run.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            progress(run)
        );
    }
    Ok(())
}

pub async fn cmd_job_delete(runtime: &Runtime, job_id: Uuid) -> Result<()> {
    runtime.jobs().delete_job(job_id).await?;
    println!("Job {job_id} deleted.");
    Ok(())
}

pub async fn cmd_job_delete_run(runtime: &Runtime, run_id: Uuid) -> Result<()> {
    runtime.jobs().delete_job_run(run_id).await?;
    println!("Run {run_id} deleted.");
    Ok(())
}

/// Print the log records captured for a run.
pub async fn cmd_job_logs(runtime: &Runtime, run_id: Uuid) -> Result<()> {
    let logs = runtime.jobs().list_run_logs(run_id).await?;
    if logs.is_empty() {
        println!("No log records for run {run_id}.");
        return Ok(());
    }

    for record in &logs {
        println!(
            "{} {:<8} [{}] {}",
            record.created.to_rfc3339(),
            record.level,
            record.target,
            record.message
        );
        if let Some(exception) = &record.exception {
            println!("    {}: {}", exception.class, exception.message);
            for line in exception.traceback.lines() {
                println!("    {line}");
            }
        }
    }
    Ok(())
}

/// Run one retention sweep now.
pub async fn cmd_logs_cleanup(runtime: &Runtime) -> Result<()> {
    let report = runtime.sweeper().cleanup_old_messages().await;

    println!("{:<10} {}", "LEVEL", "DELETED");
    println!("{}", "-".repeat(20));
    for (level, count) in &report.deleted {
        println!("{level:<10} {count}");
    }
    println!("{:<10} {}", "(expired)", report.expired);

    if !report.is_clean() {
        for failure in &report.failures {
            eprintln!("warning: {failure}");
        }
        bail!("{} retention pass(es) failed", report.failures.len());
    }
    Ok(())
}

/// Consume the job queue until Ctrl-C.
pub async fn cmd_worker(runtime: &Runtime) -> Result<()> {
    let worker = runtime
        .worker()
        .context("no job queue configured; jobs run eagerly")?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });

    worker.run(rx).await;
    Ok(())
}

/// Parse positional job arguments. Each value is JSON; anything that does
/// not parse is taken as a plain string.
pub fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter().map(|s| parse_value(s)).collect()
}

/// Parse `key=value` keyword arguments.
pub fn parse_kwargs(raw: &[String]) -> Result<Map<String, Value>> {
    let mut kwargs = Map::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("keyword argument '{item}' must be key=value");
        };
        if key.is_empty() {
            bail!("keyword argument '{item}' has an empty key");
        }
        kwargs.insert(key.to_string(), parse_value(value));
    }
    Ok(kwargs)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_outcome(outcome: &RunOutcome) {
    let state = if outcome.success { "succeeded" } else { "failed" };
    println!("Run {} of job {} {state}.", outcome.run_id, outcome.job_id);
    if let Some(failure) = &outcome.failure {
        println!("{failure}");
    }
}

fn progress(run: &JobRun) -> String {
    match (run.progress_current, run.progress_total) {
        (Some(current), Some(total)) => format!("{current}/{total}"),
        (Some(current), None) => current.to_string(),
        _ => String::new(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
