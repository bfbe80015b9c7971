//! Output formatting for CLI

use std::time::Duration;

use console::style;
use serde::Serialize;
use tabled::{Table, Tabled};

use harken_core::Match;
use harken_engine::ingest::{IngestOutcome, IngestStatus};

/// Output format options
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

#[derive(Tabled)]
struct MatchRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Metadata")]
    metadata: String,
    #[tabled(rename = "Offset")]
    offset: String,
    #[tabled(rename = "Id")]
    id: u32,
}

#[derive(Serialize)]
struct IdentifyReport<'a> {
    generated_at: String,
    elapsed_ms: u128,
    matches: &'a [Match],
}

/// Print ranked matches in the selected format.
pub fn print_matches(matches: &[Match], took: Duration, format: &str) {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            let report = IdentifyReport {
                generated_at: chrono::Utc::now().to_rfc3339(),
                elapsed_ms: took.as_millis(),
                matches,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let rows: Vec<MatchRow> = matches
                .iter()
                .enumerate()
                .map(|(i, m)| MatchRow {
                    rank: i + 1,
                    score: format!("{:.0}", m.score),
                    metadata: m.metadata.clone(),
                    offset: format_offset(m.earliest_db_time_ms),
                    id: m.recording_id,
                })
                .collect();
            println!("{}", Table::new(rows));
            println!("matched in {}", format_duration(took));
        }
        OutputFormat::Text => {
            if matches.is_empty() {
                println!("{}", style("no matches").yellow());
            }
            for (i, m) in matches.iter().enumerate() {
                let line = format!(
                    "{:>3}. {:>10.0}  {}  (at {}, id {})",
                    i + 1,
                    m.score,
                    m.metadata,
                    format_offset(m.earliest_db_time_ms),
                    m.recording_id
                );
                if i == 0 {
                    println!("{}", style(line).green().bold());
                } else {
                    println!("{line}");
                }
            }
            println!("matched in {}", format_duration(took));
        }
    }
}

/// Print per-file ingest outcomes and a summary line.
pub fn print_ingest(outcomes: &[IngestOutcome], format: &str) {
    if OutputFormat::from(format) == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string_pretty(outcomes).unwrap_or_else(|_| "[]".to_string())
        );
        return;
    }

    let mut stored = 0usize;
    let mut duplicate = 0usize;
    let mut failed = 0usize;
    for outcome in outcomes {
        match &outcome.status {
            IngestStatus::Stored { id, fingerprints } => {
                stored += 1;
                println!(
                    "{} {} (id {id}, {fingerprints} fingerprints)",
                    style("stored").green(),
                    outcome.path.display()
                );
            }
            IngestStatus::Duplicate => {
                duplicate += 1;
                println!(
                    "{} {}",
                    style("skipped").yellow(),
                    outcome.path.display()
                );
            }
            IngestStatus::Failed { error } => {
                failed += 1;
                println!(
                    "{} {}: {error}",
                    style("failed").red(),
                    outcome.path.display()
                );
            }
        }
    }
    println!("{stored} stored, {duplicate} skipped, {failed} failed");
}

fn format_offset(ms: u32) -> String {
    format!("{}:{:04.1}", ms / 60_000, (ms % 60_000) as f64 / 1000.0)
}

fn format_duration(took: Duration) -> String {
    if took.as_secs() >= 1 {
        format!("{:.2}s", took.as_secs_f64())
    } else {
        format!("{}ms", took.as_millis())
    }
}
