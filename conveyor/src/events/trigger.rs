//! Trigger rules matched against committed transitions.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::Status;
use crate::errors::ConveyorError;
use crate::hierarchy::{ActionInstance, PipelineInstance};

/// Which instance a trigger looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerScope {
    /// The pipeline after the transition.
    #[default]
    Pipeline,
    /// The action whose completion caused the transition.
    Action,
}

/// A configured notification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    /// Trigger name; fired events are called `trigger.<name>`.
    pub name: String,
    /// What the statuses are matched against.
    #[serde(default)]
    pub scope: TriggerScope,
    /// Statuses that fire the trigger. Empty matches any terminal status.
    #[serde(default)]
    pub statuses: Vec<Status>,
    /// Regex the pipeline name must match, if set.
    #[serde(default)]
    pub pipeline_name_pattern: Option<String>,
}

impl EventTrigger {
    /// Creates a pipeline-scope trigger matching any terminal status.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: TriggerScope::Pipeline,
            statuses: Vec::new(),
            pipeline_name_pattern: None,
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: TriggerScope) -> Self {
        self.scope = scope;
        self
    }

    /// Adds a status that fires the trigger.
    #[must_use]
    pub fn on(mut self, status: Status) -> Self {
        self.statuses.push(status);
        self
    }

    /// Restricts the trigger to pipelines whose name matches `pattern`.
    #[must_use]
    pub fn with_pipeline_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pipeline_name_pattern = Some(pattern.into());
        self
    }

    /// Returns the name of the event this trigger fires.
    #[must_use]
    pub fn event_type(&self) -> String {
        format!("trigger.{}", self.name)
    }
}

/// An [`EventTrigger`] with its name pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledTrigger {
    trigger: EventTrigger,
    pattern: Option<Regex>,
}

impl CompiledTrigger {
    /// Compiles a trigger.
    ///
    /// # Errors
    ///
    /// `Config` if the name pattern is not a valid regex.
    pub fn compile(trigger: EventTrigger) -> Result<Self, ConveyorError> {
        let pattern = trigger
            .pipeline_name_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConveyorError::Config(format!("trigger '{}': {e}", trigger.name)))?;
        Ok(Self { trigger, pattern })
    }

    /// Returns the rule.
    #[must_use]
    pub const fn trigger(&self) -> &EventTrigger {
        &self.trigger
    }

    /// Returns true if the transition fires this trigger.
    #[must_use]
    pub fn matches(&self, pipeline: &PipelineInstance, action: &ActionInstance) -> bool {
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(&pipeline.name) {
                return false;
            }
        }
        let status = match self.trigger.scope {
            TriggerScope::Pipeline => pipeline.status,
            TriggerScope::Action => action.status,
        };
        if self.trigger.statuses.is_empty() {
            status.is_terminal()
        } else {
            self.trigger.statuses.contains(&status)
        }
    }
}
