//! Plan validation before dispatch.
//!
//! Catching planner malfunction here keeps the executor free of per-action
//! field juggling and produces the exact messages the retryability
//! classification keys on.

use crate::model::{ActionPlan, ActionType};

const MAX_REMAINING_STEPS: usize = 3;

/// Clamp model-shaped fields to their contract.
pub fn normalize_plan(plan: &mut ActionPlan) {
    if let Some(adaptive) = plan.plan.as_mut() {
        adaptive.remaining_steps.truncate(MAX_REMAINING_STEPS);
    }
    if plan.action_type == ActionType::Finish {
        plan.is_finished = true;
    }
}

/// Check that the plan carries every field its action needs.
pub fn validate_plan(plan: &ActionPlan) -> Result<(), String> {
    let action = plan.action_type;

    if action == ActionType::Unknown {
        return Err("Unsupported action requested by the planner".to_string());
    }

    if action.needs_target() && plan.target_id.as_deref().map_or(true, str::is_empty) {
        return Err(format!(
            "Action '{}' requires a target element ID",
            action.as_str()
        ));
    }

    if action == ActionType::DragAndDrop
        && plan.target_id2.as_deref().map_or(true, str::is_empty)
    {
        return Err("Action 'drag_and_drop' requires targetId2".to_string());
    }

    if action == ActionType::Navigate {
        let value = plan.target_value()?;
        if url::Url::parse(value).is_err() {
            return Err(format!("Value '{value}' is not a valid absolute URL"));
        }
        return Ok(());
    }

    if action.needs_value() && plan.value.as_deref().map_or(true, str::is_empty) {
        if action == ActionType::Navigate {
            return Err("Action 'navigate' requires a URL".to_string());
        }
        return Err(format!("Action '{}' requires a value", action.as_str()));
    }

    if action == ActionType::HandleDialog {
        let value = plan.value.as_deref().unwrap_or_default();
        if value != "accept" && value != "dismiss" {
            return Err(format!(
                "Action 'handle_dialog' takes 'accept' or 'dismiss', got '{value}'"
            ));
        }
    }

    Ok(())
}

impl ActionPlan {
    fn target_value(&self) -> Result<&str, String> {
        self.value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "Action 'navigate' requires a URL".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AdaptivePlan;

    fn plan(action: ActionType) -> ActionPlan {
        ActionPlan {
            thought: String::new(),
            plan: None,
            action_type: action,
            target_id: None,
            target_id2: None,
            value: None,
            is_finished: false,
        }
    }

    #[test]
    fn element_actions_require_a_target() {
        let err = validate_plan(&plan(ActionType::Click)).unwrap_err();
        assert!(err.contains("requires a target"));
    }

    #[test]
    fn navigate_requires_a_valid_url() {
        let err = validate_plan(&plan(ActionType::Navigate)).unwrap_err();
        assert!(err.contains("requires a URL"));

        let mut bad = plan(ActionType::Navigate);
        bad.value = Some("not a url".to_string());
        assert!(validate_plan(&bad).is_err());

        let mut good = plan(ActionType::Navigate);
        good.value = Some("https://example.com/login".to_string());
        assert!(validate_plan(&good).is_ok());
    }

    #[test]
    fn unknown_actions_are_rejected() {
        let err = validate_plan(&plan(ActionType::Unknown)).unwrap_err();
        assert!(err.contains("Unsupported action"));
    }

    #[test]
    fn handle_dialog_value_is_constrained() {
        let mut dialog = plan(ActionType::HandleDialog);
        dialog.value = Some("maybe".to_string());
        assert!(validate_plan(&dialog).is_err());
        dialog.value = Some("accept".to_string());
        assert!(validate_plan(&dialog).is_ok());
    }

    #[test]
    fn drag_and_drop_needs_both_targets() {
        let mut drag = plan(ActionType::DragAndDrop);
        drag.target_id = Some("a-1".to_string());
        let err = validate_plan(&drag).unwrap_err();
        assert!(err.contains("requires targetId2"));
    }

    #[test]
    fn normalize_truncates_remaining_steps_and_marks_finish() {
        let mut finished = plan(ActionType::Finish);
        finished.plan = Some(AdaptivePlan {
            current_status: "done".to_string(),
            remaining_steps: vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            is_plan_changed: false,
        });
        normalize_plan(&mut finished);
        assert!(finished.is_finished);
        assert_eq!(finished.plan.unwrap().remaining_steps.len(), 3);
    }

    #[test]
    fn scroll_without_target_is_valid() {
        assert!(validate_plan(&plan(ActionType::Scroll)).is_ok());
    }
}
