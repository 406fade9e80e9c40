//! Stdout-based event sink.
//!
//! Prints every stage and step event as one JSON object per line, for
//! piping progress into other tools (`deploy | jq`).

use crate::stage::{EventSink, StepEvent};

/// Sink that outputs JSON lines to stdout.
///
/// Useful for:
/// - Piping deployment progress to other tools
/// - CI logs where a TTY progress display is unavailable
pub struct StdoutReporter;

impl StdoutReporter {
    pub fn new() -> Self {
        Self
    }

    fn print_stage(&self, stage: &str, state: &str) {
        let json = serde_json::json!({
            "type": "stage",
            "stage": stage,
            "state": state,
        });
        println!("{}", json);
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for StdoutReporter {
    fn stage_started(&self, stage: &str) {
        self.print_stage(stage, "started");
    }

    fn stage_finished(&self, stage: &str) {
        self.print_stage(stage, "finished");
    }

    fn step(&self, event: &StepEvent) {
        match serde_json::to_string(event) {
            Ok(json) => println!("{}", json),
            Err(err) => tracing::warn!(error = %err, step = %event.step, "failed to serialize step event"),
        }
    }
}
