//! Stdin implementation of the interactive override prompt.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use agent_core::{ActionPlan, OverrideChoice, OverridePrompt};

/// Fixed-menu review prompt on stdin: execute, override, skip or quit.
pub struct StdinPrompt;

impl StdinPrompt {
    pub fn new() -> Self {
        Self
    }

    async fn read_line() -> Option<String> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        lines.next_line().await.ok().flatten()
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverridePrompt for StdinPrompt {
    async fn review(&self, plan: &ActionPlan, _state_text: &str) -> OverrideChoice {
        println!("\n--- proposed action -------------------------------------");
        if !plan.thought.is_empty() {
            println!("thought: {}", plan.thought);
        }
        println!("action:  {}", plan.label());
        if let Some(adaptive) = &plan.plan {
            println!("status:  {}", adaptive.current_status);
            for (index, step) in adaptive.remaining_steps.iter().enumerate() {
                println!("  next {}: {}", index + 1, step);
            }
        }

        loop {
            println!("[e]xecute / [o]verride / [s]kip / [q]uit ?");
            let Some(line) = Self::read_line().await else {
                return OverrideChoice::Quit;
            };
            match line.trim().to_lowercase().as_str() {
                "" | "e" | "execute" => return OverrideChoice::Execute,
                "s" | "skip" => return OverrideChoice::Skip,
                "q" | "quit" => return OverrideChoice::Quit,
                "o" | "override" => {
                    println!("paste a replacement action as one JSON object:");
                    let Some(json) = Self::read_line().await else {
                        return OverrideChoice::Quit;
                    };
                    match serde_json::from_str::<ActionPlan>(&json) {
                        Ok(replacement) => return OverrideChoice::Override(replacement),
                        Err(err) => {
                            warn!(%err, "override did not parse; try again");
                        }
                    }
                }
                other => {
                    println!("unrecognized choice '{other}'");
                }
            }
        }
    }
}
