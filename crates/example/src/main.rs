//! Countdown agent CLI.
//!
//! Counts down from the given number, one turn per step, then prints a report
//! assembled from the agent's context.
//!
//! # Usage
//!
//! ```bash
//! countdown [from]
//! ```
//!
//! # Example
//!
//! ```bash
//! RUST_LOG=debug BRAID_LOG_FORMAT=compact countdown 5
//! ```

use braid_core::{Error, PluginGroup, Registry};
use braid_core_plugins::{DefaultPlugins, TracingPlugin};
use example::{countdown_turn, mission_control};

#[tokio::main]
#[expect(clippy::print_stderr, reason = "CLI output")]
async fn main() {
    let from = match std::env::args().nth(1).map(|arg| arg.parse::<u64>()) {
        None => 3,
        Some(Ok(from)) => from,
        Some(Err(err)) => {
            eprintln!("Usage: countdown [from]");
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = launch(from).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

#[expect(clippy::print_stdout, reason = "CLI output")]
async fn launch(from: u64) -> Result<(), Error> {
    let registry = Registry::new();
    registry.add_plugins(
        DefaultPlugins
            .build()
            .disable::<TracingPlugin>()
            .add(TracingPlugin::from_env().with_lifecycle_logging(true)),
    )?;

    let agent = mission_control(&registry, from)?;
    agent.put(countdown_turn(&registry, from)?).await?;

    let mut run = agent.run()?;
    while let Some(pair) = run.next().await {
        let (_, value) = pair?;
        println!("{value}");
    }
    Ok(())
}
