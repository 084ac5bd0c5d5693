//! Table rendering for the operator-facing commands.

use queue_core::types::format_timestamp;
use queue_core::{Job, StateCounts};
use tabled::settings::Style;
use tabled::{Table, Tabled};

const COMMAND_WIDTH: usize = 50;

#[derive(Tabled)]
struct JobLine {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Created At")]
    created_at: String,
}

#[derive(Tabled)]
struct DlqLine {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "Attempts")]
    attempts: i64,
    #[tabled(rename = "Created At")]
    created_at: String,
    #[tabled(rename = "Last Updated")]
    updated_at: String,
}

#[derive(Tabled)]
struct StateLine {
    #[tabled(rename = "State")]
    state: &'static str,
    #[tabled(rename = "Count")]
    count: i64,
}

pub fn job_table(jobs: &[Job]) -> String {
    let lines: Vec<JobLine> = jobs
        .iter()
        .map(|job| JobLine {
            id: job.id.clone(),
            command: truncate_command(&job.command),
            state: job.state.to_string(),
            attempts: format!("{}/{}", job.attempts, job.max_retries),
            created_at: format_timestamp(job.created_at),
        })
        .collect();

    Table::new(lines).with(Style::psql()).to_string()
}

pub fn dlq_table(jobs: &[Job]) -> String {
    let lines: Vec<DlqLine> = jobs
        .iter()
        .map(|job| DlqLine {
            id: job.id.clone(),
            command: truncate_command(&job.command),
            attempts: job.attempts,
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(job.updated_at),
        })
        .collect();

    Table::new(lines).with(Style::psql()).to_string()
}

pub fn state_table(counts: &StateCounts) -> String {
    let lines: Vec<StateLine> = counts
        .iter()
        .map(|(state, count)| StateLine {
            state: state.as_str(),
            count,
        })
        .collect();

    Table::new(lines).with(Style::psql()).to_string()
}

fn truncate_command(command: &str) -> String {
    if command.chars().count() > COMMAND_WIDTH {
        let head: String = command.chars().take(COMMAND_WIDTH).collect();
        format!("{head}...")
    } else {
        command.to_owned()
    }
}
