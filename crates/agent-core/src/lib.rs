//! Agent core: planner, executor, history, error translation, script
//! emission and the observe-think-act loop controller.

pub mod agent_loop;
pub mod emitter;
pub mod errors;
pub mod executor;
pub mod history;
pub mod model;
pub mod plan_validator;
pub mod planner;
pub mod translate;

pub use agent_loop::{
    AgentLoop, ContextPort, ExecutePort, LoopConfig, LoopOutcome, NoPrompt, ObservePort,
    OverrideChoice, OverridePrompt,
};
pub use emitter::{FileEmitter, MemoryEmitter, ScriptEmitter};
pub use errors::AgentError;
pub use executor::{is_fatal_message, Executor};
pub use history::HistoryLog;
pub use model::{ActionPlan, ActionType, AdaptivePlan, ExecResult};
pub use plan_validator::{normalize_plan, validate_plan};
pub use planner::{
    CerebrasConfig, CerebrasProvider, LlmProvider, MockProvider, PlanRequest, Planner,
};
pub use translate::{translate_error, TranslatedError};
