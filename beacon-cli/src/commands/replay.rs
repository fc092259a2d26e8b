//! Replay recorded flag evaluations through the exposure pipeline.
//!
//! Input is JSON Lines, one evaluation per line:
//!
//! ```json
//! {"flag_key": "checkout", "result": {"do_log": true, "allocation_key": "a1", "variant": "on"}, "context": {"targeting_key": "user-1", "plan": "pro"}}
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_exposures::{
    EvaluationContext, EvaluationResult, ExposureBatch, ExposurePipeline, ExposureReporter,
    ExposureTransport, TransportError, TransportResponse, WorkerStats,
};
use clap::Args;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::BeaconConfig;

#[derive(Args)]
pub struct ReplayArgs {
    /// JSON Lines file of recorded evaluations
    pub input: PathBuf,

    /// Print batches to stdout instead of sending them to the agent
    #[arg(long)]
    pub dry_run: bool,
}

/// One recorded evaluation.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    flag_key: String,
    result: EvaluationResult,
    #[serde(default)]
    context: EvaluationContext,
}

/// Counts from a replay run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lines: usize,
    pub reported: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub stats: WorkerStats,
}

impl std::fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Replayed {} evaluations:", self.lines)?;
        writeln!(f, "  reported:  {}", self.reported)?;
        writeln!(f, "  skipped:   {}", self.skipped)?;
        writeln!(f, "  malformed: {}", self.malformed)?;
        writeln!(f, "Delivery:")?;
        writeln!(f, "  batches:   {}", self.stats.flushes)?;
        writeln!(f, "  sent:      {}", self.stats.events_sent)?;
        writeln!(f, "  dropped:   {}", self.stats.events_dropped)?;
        write!(f, "  failures:  {}", self.stats.send_failures)
    }
}

/// Writes each batch to stdout as one JSON line.
struct PrintTransport;

impl ExposureTransport for PrintTransport {
    fn send_exposures(&self, batch: &ExposureBatch) -> Result<TransportResponse, TransportError> {
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, batch)?;
        writeln!(stdout)?;
        Ok(TransportResponse::new(200))
    }
}

pub fn run(args: ReplayArgs, config: &BeaconConfig) -> Result<()> {
    let file = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;

    let pipeline = if args.dry_run {
        ExposurePipeline::new(config.exposures.clone(), Arc::new(PrintTransport))?
    } else {
        ExposurePipeline::with_http(config.exposures.clone())?
    };
    info!(input = %args.input.display(), dry_run = args.dry_run, "Replaying evaluations");

    let summary = replay(BufReader::new(file), &pipeline)?;

    eprintln!("{summary}");
    Ok(())
}

/// Replay `reader`, then shut the pipeline down. Shutdown runs even when
/// reading fails, so exposures already reported are still delivered.
fn replay(reader: impl BufRead, pipeline: &ExposurePipeline) -> Result<ReplaySummary> {
    let replayed = replay_lines(reader, pipeline.reporter());
    let stats = pipeline.shutdown();

    let mut summary = replayed?;
    summary.stats = stats;
    Ok(summary)
}

/// Feed every line through the reporter. Blank lines are ignored.
fn replay_lines(reader: impl BufRead, reporter: &ExposureReporter) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        let record: ReplayRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                debug!(line = index + 1, error = %e, "Skipping malformed evaluation");
                summary.malformed += 1;
                continue;
            }
        };

        if reporter.report(&record.result, &record.flag_key, &record.context) {
            summary.reported += 1;
        } else {
            summary.skipped += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_exposures::{ExposureConfig, MemoryTransport};
    use std::io::Cursor;
    use std::time::Duration;

    const INPUT: &str = r#"
{"flag_key": "checkout", "result": {"do_log": true, "allocation_key": "a1", "variant": "on"}, "context": {"targeting_key": "u1", "plan": "pro"}}
{"flag_key": "checkout", "result": {"do_log": true, "allocation_key": "a1", "variant": "on"}, "context": {"targeting_key": "u1", "plan": "pro"}}
{"flag_key": "checkout", "result": {"do_log": false, "allocation_key": "a1", "variant": "on"}, "context": {"targeting_key": "u2"}}
{"flag_key": "search", "result": {"do_log": true, "allocation_key": "a2", "variant": "v2"}, "context": {"targeting_key": "u1"}}
not json

{"flag_key": "search", "result": {"do_log": true, "allocation_key": "a2"}, "context": {"targeting_key": "u3"}}
"#;

    fn pipeline(transport: Arc<MemoryTransport>) -> ExposurePipeline {
        let config = ExposureConfig::default().with_flush_interval(Duration::from_secs(3600));
        ExposurePipeline::new(config, transport).unwrap()
    }

    #[test]
    fn test_replay_counts_each_outcome() {
        let transport = Arc::new(MemoryTransport::new());
        let pipeline = pipeline(transport.clone());

        let summary = replay_lines(Cursor::new(INPUT), pipeline.reporter()).unwrap();

        assert_eq!(summary.lines, 6);
        assert_eq!(summary.reported, 2);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.malformed, 1);
    }

    #[test]
    fn test_replay_delivers_on_shutdown() {
        let transport = Arc::new(MemoryTransport::new());
        let pipeline = pipeline(transport.clone());

        replay_lines(Cursor::new(INPUT), pipeline.reporter()).unwrap();
        let stats = pipeline.shutdown();

        assert_eq!(stats.events_sent, 2);
        assert_eq!(transport.calls(), 1);
        let batch = &transport.batches()[0];
        assert_eq!(batch.exposures[0].subject.attributes.len(), 1);
    }

    #[test]
    fn test_read_error_still_flushes_reported_exposures() {
        let transport = Arc::new(MemoryTransport::new());
        let pipeline = pipeline(transport.clone());

        let mut input = br#"{"flag_key": "checkout", "result": {"do_log": true, "allocation_key": "a1", "variant": "on"}, "context": {"targeting_key": "u1"}}"#.to_vec();
        input.extend_from_slice(b"\n\xff\xfe\n");

        let result = replay(Cursor::new(input), &pipeline);

        assert!(result.is_err());
        assert_eq!(transport.exposure_count(), 1);
    }

    #[test]
    fn test_replay_reports_final_stats() {
        let transport = Arc::new(MemoryTransport::new());
        let pipeline = pipeline(transport.clone());

        let summary = replay(Cursor::new(INPUT), &pipeline).unwrap();

        assert_eq!(summary.reported, 2);
        assert_eq!(summary.stats.events_sent, 2);
        assert_eq!(summary.stats.flushes, 1);
    }

    #[test]
    fn test_summary_display() {
        let summary = ReplaySummary {
            lines: 3,
            reported: 2,
            skipped: 1,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("Replayed 3 evaluations:"));
        assert!(text.contains("reported:  2"));
    }
}
