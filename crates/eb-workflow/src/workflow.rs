//! Workflow definitions
//!
//! A getter workflow is a fixed two-stage chain: `CallBackend` then
//! `PublishNotification`. Workflows are built once from the registry and
//! never change afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use eb_common::{BridgeError, DispatchRule, InboundEvent, Result, RuleKey};
use eb_router::RuleRegistry;
use serde::Serialize;
use tracing::{debug, info};

use crate::notification::ResultBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    CallBackend,
    PublishNotification,
}

/// Execution state of one workflow run.
///
/// `Start → CallBackend → {PublishNotification → Completed | Failed}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Start,
    CallBackend,
    PublishNotification,
    Completed,
    Failed { reason: BridgeError },
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Start => "start",
            WorkflowState::CallBackend => "call_backend",
            WorkflowState::PublishNotification => "publish_notification",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Failed { reason } => write!(f, "failed ({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    rule: DispatchRule,
    steps: [Stage; 2],
    result_binding: ResultBinding,
}

impl Workflow {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rule(&self) -> &DispatchRule {
        &self.rule
    }

    pub fn steps(&self) -> &[Stage] {
        &self.steps
    }

    pub fn result_binding(&self) -> &ResultBinding {
        &self.result_binding
    }
}

pub fn workflow_id(event_type: &str) -> String {
    format!("{}Workflow", event_type)
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowBuilder {
    binding: ResultBinding,
}

impl WorkflowBuilder {
    pub fn new(binding: ResultBinding) -> Self {
        Self { binding }
    }

    /// Build the getter workflow for a rule marked `notify`
    pub fn build(&self, rule: &DispatchRule) -> Result<Workflow> {
        if !rule.notify {
            return Err(BridgeError::Config(format!(
                "rule '{}' is not marked for notification",
                rule.name
            )));
        }

        let workflow = Workflow {
            id: workflow_id(&rule.event_type),
            rule: rule.clone(),
            steps: [Stage::CallBackend, Stage::PublishNotification],
            result_binding: self.binding.clone(),
        };
        debug!(workflow_id = %workflow.id, rule = %rule.name, "Built workflow");
        Ok(workflow)
    }

    /// Build workflows for every `notify` rule in the registry
    pub fn build_all(&self, registry: &RuleRegistry) -> Result<WorkflowSet> {
        let mut set = WorkflowSet::default();
        for rule in registry.list().filter(|r| r.notify) {
            set.insert(self.build(rule)?);
        }
        info!(workflows = set.len(), "Workflows built");
        Ok(set)
    }
}

/// Immutable lookup of workflows by rule key
#[derive(Debug, Default)]
pub struct WorkflowSet {
    by_key: HashMap<RuleKey, Arc<Workflow>>,
    order: Vec<RuleKey>,
}

impl WorkflowSet {
    fn insert(&mut self, workflow: Workflow) {
        let key = workflow.rule.key();
        if self.by_key.insert(key.clone(), Arc::new(workflow)).is_none() {
            self.order.push(key);
        }
    }

    pub fn get(&self, key: &RuleKey) -> Option<&Arc<Workflow>> {
        self.by_key.get(key)
    }

    pub fn for_event(&self, event: &InboundEvent) -> Option<&Arc<Workflow>> {
        self.get(&event.key())
    }

    /// Workflow ids in rule registration order
    pub fn ids(&self) -> Vec<&str> {
        self.iter().map(|w| w.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Workflow>> + '_ {
        self.order.iter().filter_map(|key| self.by_key.get(key))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
