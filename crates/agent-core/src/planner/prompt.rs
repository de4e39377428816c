//! Prompt templates for the planner.

use crate::planner::PlanRequest;

/// System prompt establishing the action schema and the ground rules.
pub const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. At each step you receive the goal, the current page state (URL, title and a list of interactive elements), the recent action history, and the last error if the previous action failed. You decide exactly one next action.

## Page state format

Interactive elements are listed one per line:
- <button> "Login" [ID: button-3fa92b1c-1]
- <input[type=email]> "Email address" [ID: input-88b01d2e-1]

Only elements with an [ID: ...] can be targeted. Elements marked "(Scrollable)" can be scrolled; "(in Iframe)" means the element lives inside a frame; target it like any other element. A trailing line such as "... (4 more items are not visible. Use 'scroll' to explore.)" means more elements exist below the fold.

## Rules

1. Always reference elements by their exact ID from the CURRENT state. IDs from earlier steps may be gone.
2. If the element you need is not listed, use 'scroll' first and re-inspect before interacting.
3. If the previous step failed, do not repeat the same action unchanged. Change strategy based on the error guidance.
4. Close tabs that are irrelevant to the goal (ads, popups) with 'close_tab' before continuing.
5. Maintain the adaptive plan: report currentStatus, keep remainingSteps to at most 3 short items, and set isPlanChanged to true whenever the page forced you to deviate.
6. When a dialog banner is shown at the top of the state, resolve it first with 'handle_dialog' and value "accept" or "dismiss".
7. When the goal is fully achieved, respond with actionType "finish" and isFinished true.

## Actions

click, dblclick, right_click, hover, focus, clear, check, uncheck, scroll, wait_for_element, assert_visible: targetId required.
fill, type, keypress, select_option, upload, assert_text, assert_value: targetId and value required.
navigate, assert_url: value is an absolute URL.
switch_tab: value is a zero-based tab index or a title/URL substring.
close_tab, reload, go_back, finish: no parameters.
handle_dialog: value is "accept" or "dismiss".
drag_and_drop: targetId (source) and targetId2 (destination).

## Output

Respond with a single JSON object and nothing else:

{
  "thought": "why this action moves toward the goal",
  "plan": {
    "currentStatus": "where we are",
    "remainingSteps": ["next", "then"],
    "isPlanChanged": false
  },
  "actionType": "click",
  "targetId": "button-3fa92b1c-1",
  "targetId2": null,
  "value": null,
  "isFinished": false
}"#;

/// Assemble the per-step user message.
pub fn build_user_message(request: &PlanRequest) -> String {
    let mut message = format!("## Goal\n{}\n\n## Current page state\n{}\n", request.goal, request.state_text);

    if request.history.is_empty() {
        message.push_str("\n## History\n(no actions taken yet)\n");
    } else {
        message.push_str("\n## History (most recent last)\n");
        for entry in &request.history {
            message.push_str("- ");
            message.push_str(entry);
            message.push('\n');
        }
    }

    if let Some(error) = &request.last_error {
        message.push_str(&format!(
            "\n## Last error\n{error}\nChange strategy accordingly.\n"
        ));
    }

    message.push_str("\nRespond with the next action as a single JSON object.");
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_carries_goal_state_history_and_error() {
        let request = PlanRequest {
            goal: "log in".to_string(),
            state_text: "URL: https://example.com\nTitle: Example\n".to_string(),
            history: vec!["SUCCESS: navigate 'https://example.com'".to_string()],
            last_error: Some("Timeout: the action did not complete".to_string()),
        };
        let message = build_user_message(&request);
        assert!(message.contains("## Goal\nlog in"));
        assert!(message.contains("URL: https://example.com"));
        assert!(message.contains("SUCCESS: navigate"));
        assert!(message.contains("## Last error"));
        assert!(message.contains("Change strategy"));
    }

    #[test]
    fn system_prompt_states_the_ground_rules() {
        for marker in [
            "exact ID",
            "'scroll' first",
            "change strategy",
            "close_tab",
            "isPlanChanged",
            "handle_dialog",
        ] {
            assert!(SYSTEM_PROMPT.contains(marker), "missing rule marker {marker}");
        }
    }
}
