//! The default `pr_analysis` workflow

use std::time::Duration;

use mergeflow_core::model::{StepType, WorkflowDefinition, WorkflowStep, WorkflowTrigger};

/// Name of the workflow started for every incoming PR event
pub const PR_ANALYSIS_WORKFLOW: &str = "pr_analysis";

/// Analysis → codegen → validation → notification, triggered on PR
/// updates
pub fn pr_analysis_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new(PR_ANALYSIS_WORKFLOW, "1.0.0")
        .with_steps(vec![
            WorkflowStep::new("analyze", "Analyze changes", StepType::Analysis)
                .with_timeout(Duration::from_secs(120)),
            WorkflowStep::new("generate", "Generate fix tasks", StepType::Codegen)
                .with_dependencies(vec!["analyze"])
                .with_timeout(Duration::from_secs(300)),
            WorkflowStep::new("validate", "Validate generated tasks", StepType::Validation)
                .with_dependencies(vec!["generate"])
                .with_timeout(Duration::from_secs(120)),
            WorkflowStep::new("notify", "Notify subscribers", StepType::Notification)
                .with_dependencies(vec!["validate"])
                .with_timeout(Duration::from_secs(30)),
        ])
        .with_trigger(WorkflowTrigger::new("pr_updated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workflow_is_valid() {
        let definition = pr_analysis_workflow();
        assert!(definition.validate().is_ok());
        assert_eq!(definition.name, PR_ANALYSIS_WORKFLOW);
        assert_eq!(definition.steps.len(), 4);
    }

    #[test]
    fn test_steps_form_a_chain() {
        let definition = pr_analysis_workflow();
        assert!(definition.step("analyze").unwrap().dependencies.is_empty());
        assert_eq!(
            definition.step("generate").unwrap().dependencies,
            vec!["analyze"]
        );
        assert_eq!(
            definition.step("notify").unwrap().dependencies,
            vec!["validate"]
        );
    }
}
