//! The observe-think-act loop and the ports it drives.

mod controller;
mod ports;

pub use controller::{AgentLoop, LoopConfig, LoopOutcome};
pub use ports::{
    ContextPort, ExecutePort, NoPrompt, ObservePort, OverrideChoice, OverridePrompt,
};
