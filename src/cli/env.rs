//! Command-line arguments.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "flash-loop",
    version,
    about = "Drive a browser toward a natural-language goal and record the path as a Playwright script"
)]
pub struct CliArgs {
    /// What the agent should accomplish, in plain language.
    pub goal: String,

    /// Start URL to open before the first step.
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Run the browser headless.
    #[arg(long)]
    pub headless: bool,

    /// Review every planned action before it runs.
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Step cap for the loop.
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_steps: u32,
}
