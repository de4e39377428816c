//! The action plan schema shared between planner and executor.

use serde::{Deserialize, Serialize};

/// Closed set of actions the planner may request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    Dblclick,
    RightClick,
    Hover,
    Focus,
    Fill,
    Type,
    Clear,
    Check,
    Uncheck,
    SelectOption,
    Upload,
    DragAndDrop,
    Keypress,
    Navigate,
    Reload,
    GoBack,
    Scroll,
    SwitchTab,
    CloseTab,
    WaitForElement,
    HandleDialog,
    AssertVisible,
    AssertText,
    AssertValue,
    AssertUrl,
    Finish,
    /// Anything the model invented; rejected by validation before dispatch.
    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::Dblclick => "dblclick",
            ActionType::RightClick => "right_click",
            ActionType::Hover => "hover",
            ActionType::Focus => "focus",
            ActionType::Fill => "fill",
            ActionType::Type => "type",
            ActionType::Clear => "clear",
            ActionType::Check => "check",
            ActionType::Uncheck => "uncheck",
            ActionType::SelectOption => "select_option",
            ActionType::Upload => "upload",
            ActionType::DragAndDrop => "drag_and_drop",
            ActionType::Keypress => "keypress",
            ActionType::Navigate => "navigate",
            ActionType::Reload => "reload",
            ActionType::GoBack => "go_back",
            ActionType::Scroll => "scroll",
            ActionType::SwitchTab => "switch_tab",
            ActionType::CloseTab => "close_tab",
            ActionType::WaitForElement => "wait_for_element",
            ActionType::HandleDialog => "handle_dialog",
            ActionType::AssertVisible => "assert_visible",
            ActionType::AssertText => "assert_text",
            ActionType::AssertValue => "assert_value",
            ActionType::AssertUrl => "assert_url",
            ActionType::Finish => "finish",
            ActionType::Unknown => "unknown",
        }
    }

    /// Actions that act on a cataloged element and therefore need a target.
    pub fn needs_target(&self) -> bool {
        matches!(
            self,
            ActionType::Click
                | ActionType::Dblclick
                | ActionType::RightClick
                | ActionType::Hover
                | ActionType::Focus
                | ActionType::Fill
                | ActionType::Type
                | ActionType::Clear
                | ActionType::Check
                | ActionType::Uncheck
                | ActionType::SelectOption
                | ActionType::Upload
                | ActionType::DragAndDrop
                | ActionType::Keypress
                | ActionType::WaitForElement
                | ActionType::AssertVisible
                | ActionType::AssertText
                | ActionType::AssertValue
        )
    }

    /// Actions that carry their parameter in `value`.
    pub fn needs_value(&self) -> bool {
        matches!(
            self,
            ActionType::Fill
                | ActionType::Type
                | ActionType::SelectOption
                | ActionType::Upload
                | ActionType::Keypress
                | ActionType::Navigate
                | ActionType::SwitchTab
                | ActionType::HandleDialog
                | ActionType::AssertText
                | ActionType::AssertValue
                | ActionType::AssertUrl
        )
    }
}

/// Adaptive planning block the model maintains across steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptivePlan {
    #[serde(default)]
    pub current_status: String,
    #[serde(default)]
    pub remaining_steps: Vec<String>,
    #[serde(default)]
    pub is_plan_changed: bool,
}

/// One structured decision from the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlan {
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub plan: Option<AdaptivePlan>,
    pub action_type: ActionType,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub target_id2: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub is_finished: bool,
}

impl ActionPlan {
    pub fn finish() -> Self {
        Self {
            thought: String::new(),
            plan: None,
            action_type: ActionType::Finish,
            target_id: None,
            target_id2: None,
            value: None,
            is_finished: true,
        }
    }

    /// Short human label used in history entries and logs.
    pub fn label(&self) -> String {
        let action = self.action_type.as_str();
        match (&self.target_id, &self.value) {
            (Some(target), Some(value)) => format!("{action} '{value}' on {target}"),
            (Some(target), None) => format!("{action} on {target}"),
            (None, Some(value)) => format!("{action} '{value}'"),
            (None, None) => action.to_string(),
        }
    }
}

/// Outcome of executing one plan.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub success: bool,
    pub generated_code: Option<String>,
    pub error: Option<String>,
    pub user_guidance: Option<String>,
    pub retryable: bool,
}

impl ExecResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            retryable: true,
            ..Default::default()
        }
    }

    pub fn ok_with_code(code: impl Into<String>) -> Self {
        Self {
            success: true,
            generated_code: Some(code.into()),
            retryable: true,
            ..Default::default()
        }
    }

    pub fn fail(error: impl Into<String>, guidance: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            generated_code: None,
            error: Some(error.into()),
            user_guidance: Some(guidance.into()),
            retryable,
        }
    }
}
