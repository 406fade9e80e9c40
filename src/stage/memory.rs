//! Sink that keeps every event, for assertions and post-run summaries.

use crate::stage::{EventSink, EventState, StepEvent};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryReporter {
    stages: Mutex<Vec<String>>,
    events: Mutex<Vec<StepEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stage start and finish notifications, in order.
    pub fn stages(&self) -> Vec<String> {
        self.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Step names in the order they started.
    pub fn step_names(&self) -> Vec<String> {
        self.step_states().into_iter().map(|(name, _)| name).collect()
    }

    /// Each step with the states it went through.
    pub fn step_states(&self) -> Vec<(String, Vec<EventState>)> {
        let mut steps: Vec<(String, Vec<EventState>)> = Vec::new();
        for event in self.events() {
            if event.state == EventState::Started {
                steps.push((event.step.clone(), vec![EventState::Started]));
            } else if let Some((_, states)) = steps.iter_mut().rev().find(|(n, _)| *n == event.step) {
                states.push(event.state);
            }
        }
        steps
    }

    /// Final state of every step.
    pub fn outcomes(&self) -> Vec<(String, EventState)> {
        self.step_states()
            .into_iter()
            .filter_map(|(name, states)| states.last().copied().map(|s| (name, s)))
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
        if let Ok(mut stages) = self.stages.lock() {
            stages.clear();
        }
    }
}

impl EventSink for MemoryReporter {
    fn stage_started(&self, stage: &str) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.push(stage.to_string());
        }
    }

    fn stage_finished(&self, stage: &str) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.push(stage.to_string());
        }
    }

    fn step(&self, event: &StepEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
