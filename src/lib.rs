//! flash-loop: an autonomous web-automation agent that records its
//! successful path as a reusable Playwright script.
//!
//! The binary drives an owned browser from the command line; the library
//! entry ([`agent`]) lets a host process point the agent at a page it
//! already owns and get the generated script back as a string.

pub mod agent;
pub mod cli;
pub mod config;
pub mod prompt;

pub use agent::{agent, AgentOptions};
pub use config::AppConfig;
