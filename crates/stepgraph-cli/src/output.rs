//! Output formatting for CLI commands

use colored::Colorize;
use stepgraph_kernel::checkpoint::Checkpoint;
use stepgraph_kernel::workflow::{GraphConfig, RunOutcome, State, StreamEvent};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for automation
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

pub fn print_state(title: &str, state: &State, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            println!("  {}", title.bold());
            for (key, value) in state.as_map() {
                println!("    {}: {}", key.cyan(), value);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&serde_json::json!({ "title": title, "state": state }))?
            );
        }
    }
    Ok(())
}

pub fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> anyhow::Result<()> {
    match outcome {
        RunOutcome::Completed(state) => print_state("Completed", state, format),
        RunOutcome::Interrupted(handle) => {
            match format {
                OutputFormat::Text => println!(
                    "  {} {:?} '{}' (session {}, version {})",
                    "Paused".yellow().bold(),
                    handle.kind,
                    handle.step,
                    handle.session_id,
                    handle.version
                ),
                OutputFormat::Json => println!("{}", serde_json::to_string(handle)?),
            }
            print_state("State at pause", &handle.state, format)
        }
    }
}

pub fn print_history(history: &[Checkpoint], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            println!("  {}", "History (newest first)".bold());
            for checkpoint in history {
                println!(
                    "    v{:<3} {:<11} {:<8} next={:<12} {}",
                    checkpoint.version.to_string().yellow(),
                    checkpoint.status.to_string(),
                    format!("{:?}", checkpoint.source),
                    checkpoint.next_step.as_deref().unwrap_or("-"),
                    checkpoint.state.to_json()
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(history)?),
    }
    Ok(())
}

pub fn print_event(event: &StreamEvent, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        // Events are not serde types; print their debug form as a JSON string
        println!("{}", serde_json::to_string(&format!("{event:?}"))?);
        return Ok(());
    }
    match event {
        StreamEvent::RunStart { entry, .. } => println!("  {} at '{}'", "start".green(), entry),
        StreamEvent::StepStart { step, iteration } => {
            println!("  {} {} (#{})", "→".cyan(), step, iteration + 1)
        }
        StreamEvent::StepEnd { step, update, .. } => {
            let fields: Vec<String> = update.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("  {} {} {}", "✓".green(), step, fields.join(" "))
        }
        StreamEvent::CheckpointSaved { version, status, .. } => {
            println!("    checkpoint v{} ({})", version, status)
        }
        StreamEvent::Interrupted(handle) => {
            println!("  {} {:?} '{}'", "paused".yellow(), handle.kind, handle.step)
        }
        StreamEvent::Completed { state } => {
            println!("  {} {}", "completed".green().bold(), state.to_json())
        }
        StreamEvent::Error { error, .. } => println!("  {} {}", "error".red().bold(), error),
    }
    Ok(())
}

pub fn print_config(config: &GraphConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            println!("  {}", "Graph configuration".bold());
            println!("    max_steps:        {}", config.max_steps.to_string().yellow());
            println!("    step_timeout_ms:  {}", config.step_timeout_ms);
            println!("    run_timeout_ms:   {}", config.run_timeout_ms);
            println!("    interrupt_before: {:?}", config.interrupt_before);
            println!("    interrupt_after:  {:?}", config.interrupt_after);
            println!("    debug:            {}", config.debug);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(config)?),
    }
    Ok(())
}
