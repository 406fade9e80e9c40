//! Progress reporting.
//!
//! Every externally visible operation is a step inside a stage. A step
//! starts and then either finishes, is skipped (nothing to do, or the
//! resource was already gone) or fails. Skipped is not an error.
//!
//! This is separate from logging: cleanup loops branch on skip vs fail.

mod memory;
mod stdout;

pub use memory::MemoryReporter;
pub use stdout::StdoutReporter;

use crate::error::DeployError;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Started,
    Finished,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepEvent {
    pub stage: String,
    pub step: String,
    pub state: EventState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Receives stage and step events. Implement this for your UI.
pub trait EventSink: Send + Sync {
    fn stage_started(&self, stage: &str);
    fn stage_finished(&self, stage: &str);
    fn step(&self, event: &StepEvent);
}

/// How a step ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Finished,
    Skipped(String),
}

impl StepOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped(_))
    }
}

/// A named group of steps reported to one sink.
#[derive(Clone)]
pub struct Stage {
    name: String,
    sink: Arc<dyn EventSink>,
}

impl Stage {
    pub fn new(name: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            name: name.into(),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) {
        self.sink.stage_started(&self.name);
    }

    pub fn finish(&self) {
        self.sink.stage_finished(&self.name);
    }

    /// Run one step whose body decides between finishing and skipping.
    pub async fn perform<F>(&self, step: &str, body: F) -> Result<StepOutcome, DeployError>
    where
        F: Future<Output = Result<StepOutcome, DeployError>>,
    {
        self.emit(step, EventState::Started, None);
        let started = Instant::now();

        let result = body.await;
        match &result {
            Ok(StepOutcome::Finished) => {
                tracing::debug!(stage = %self.name, step, elapsed_ms = started.elapsed().as_millis() as u64, "step finished");
                self.emit(step, EventState::Finished, None);
            }
            Ok(StepOutcome::Skipped(reason)) => {
                tracing::debug!(stage = %self.name, step, reason = %reason, "step skipped");
                self.emit(step, EventState::Skipped, Some(reason.clone()));
            }
            Err(err) => {
                tracing::debug!(stage = %self.name, step, error = %err, "step failed");
                self.emit(step, EventState::Failed, Some(err.to_string()));
            }
        }
        result
    }

    /// Run one step that produces a value and cannot be skipped.
    pub async fn run<T, F>(&self, step: &str, body: F) -> Result<T, DeployError>
    where
        F: Future<Output = Result<T, DeployError>>,
    {
        let mut value = None;
        self.perform(step, async {
            value = Some(body.await?);
            Ok(StepOutcome::Finished)
        })
        .await?;
        value.ok_or_else(|| DeployError::InvalidState(format!("step '{}' produced no value", step)))
    }

    fn emit(&self, step: &str, state: EventState, message: Option<String>) {
        self.sink.step(&StepEvent {
            stage: self.name.clone(),
            step: step.to_string(),
            state,
            message,
        });
    }
}

/// Sink that writes events through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingReporter;

impl EventSink for LoggingReporter {
    fn stage_started(&self, stage: &str) {
        tracing::info!(stage, "stage started");
    }

    fn stage_finished(&self, stage: &str) {
        tracing::info!(stage, "stage finished");
    }

    fn step(&self, event: &StepEvent) {
        match event.state {
            EventState::Started => tracing::info!(stage = %event.stage, step = %event.step, "started"),
            EventState::Finished => tracing::info!(stage = %event.stage, step = %event.step, "finished"),
            EventState::Skipped => tracing::info!(
                stage = %event.stage,
                step = %event.step,
                reason = event.message.as_deref().unwrap_or_default(),
                "skipped"
            ),
            EventState::Failed => tracing::error!(
                stage = %event.stage,
                step = %event.step,
                error = event.message.as_deref().unwrap_or_default(),
                "failed"
            ),
        }
    }
}
