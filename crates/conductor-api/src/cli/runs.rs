//! Run inspection and storage hygiene commands.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use serde_json::json;

use conductor_core::repository::state::StateStore;
use conductor_types::execution::{ExecutionFilter, ExecutionStatus, StepStatus};

use crate::state::AppState;

pub async fn list_runs(
    state: &AppState,
    workflow: Option<String>,
    status: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<ExecutionStatus>())
        .transpose()
        .map_err(|e| anyhow!(e))?;
    let filter = ExecutionFilter {
        workflow_id: workflow,
        status,
        limit: Some(limit),
        offset: None,
    };
    let runs = state.store.list_executions(&filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Run ID").fg(Color::White),
        Cell::new("Workflow").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Step").fg(Color::White),
        Cell::new("Started").fg(Color::White),
        Cell::new("Completed").fg(Color::White),
    ]);
    for run in &runs {
        table.add_row(vec![
            Cell::new(&run.run_id),
            Cell::new(&run.workflow_id),
            execution_status_cell(run.status),
            Cell::new(format!("{}/{}", run.current_step, run.total_steps)),
            Cell::new(format_time(&run.started_at)),
            Cell::new(run.completed_at.as_ref().map_or("-".to_string(), format_time)),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn show_run(state: &AppState, run_id: &str, json: bool) -> Result<()> {
    let Some(run) = state.store.get_execution(run_id).await? else {
        bail!("run '{run_id}' not found");
    };
    let checkpoints = state.store.get_checkpoints(run_id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "execution": run,
                "checkpoints": checkpoints,
            }))?
        );
        return Ok(());
    }

    println!("Run:       {}", run.run_id);
    println!("Workflow:  {}", run.workflow_id);
    if !run.workflow_path.is_empty() {
        println!("Path:      {}", run.workflow_path);
    }
    println!("Status:    {}", run.status);
    println!("Progress:  {}/{}", run.current_step, run.total_steps);
    println!("Started:   {}", format_time(&run.started_at));
    if let Some(completed) = &run.completed_at {
        println!("Completed: {}", format_time(completed));
    }
    if let Some(error) = &run.error {
        println!("Error:     {error}");
    }

    if checkpoints.is_empty() {
        return Ok(());
    }

    println!();
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Step").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Retries").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);
    for cp in &checkpoints {
        table.add_row(vec![
            Cell::new(cp.step_index),
            Cell::new(&cp.step_name),
            step_status_cell(cp.status),
            Cell::new(cp.retry_count),
            Cell::new(cp.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn resume_point(state: &AppState, run_id: &str, json: bool) -> Result<()> {
    if state.store.get_execution(run_id).await?.is_none() {
        bail!("run '{run_id}' not found");
    }
    let index = state.store.get_resume_point(run_id).await?;
    if json {
        println!("{}", json!({ "run_id": run_id, "resume_from": index }));
    } else {
        println!("{index}");
    }
    Ok(())
}

pub async fn stats(state: &AppState, workflow: Option<&str>, json: bool) -> Result<()> {
    let stats = state.store.get_stats(workflow).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Total").fg(Color::White),
        Cell::new("Completed").fg(Color::White),
        Cell::new("Failed").fg(Color::White),
        Cell::new("Running").fg(Color::White),
        Cell::new("Success Rate").fg(Color::White),
    ]);
    table.add_row(vec![
        Cell::new(stats.total_executions),
        Cell::new(stats.completed).fg(Color::Green),
        Cell::new(stats.failed).fg(Color::Red),
        Cell::new(stats.running).fg(Color::Yellow),
        Cell::new(format!("{:.1}%", stats.success_rate * 100.0)),
    ]);
    println!("{table}");
    Ok(())
}

pub async fn cleanup(state: &AppState, days: u32, json: bool) -> Result<()> {
    let deleted = state.store.cleanup(days).await?;
    tracing::info!(deleted, retention_days = days, "cleanup finished");
    if json {
        println!("{}", json!({ "deleted": deleted, "retention_days": days }));
    } else {
        println!("Deleted {deleted} run(s) older than {days} day(s).");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn format_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn execution_status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Running => Color::Yellow,
        ExecutionStatus::Pending | ExecutionStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

fn step_status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Completed => Color::Green,
        StepStatus::Failed => Color::Red,
        StepStatus::Running => Color::Yellow,
        StepStatus::Pending | StepStatus::Skipped => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}
