use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use log::LevelFilter;
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline};

use crate::command::Command;
use crate::simulator::{MachineConfig, Simulation};

mod command;
mod simulator;

/// Drives the spindle and arm kinematics against simulated hardware.
#[derive(Parser)]
struct Args {
    /// TOML file with `[settings]`, `[spindle]` and `[linkage]` tables.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Commands to run, one per line. Without this, commands are read
    /// interactively.
    script: Option<PathBuf>,
}

#[derive(Debug)]
enum Error {
    Exit,
    Err(anyhow::Error),
}

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Error::Err(e.into())
    }
}

type Result<T> = std::result::Result<T, Error>;

fn load_config(path: &Path) -> anyhow::Result<MachineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

async fn run_line(sim: &mut Simulation, line: &str) -> Result<()> {
    let Some(cmd) = command::parse(line)? else {
        return Ok(());
    };
    if cmd == Command::Quit {
        return Err(Error::Exit);
    }
    if let Some(out) = sim.run(cmd).await? {
        println!("{out}");
    }
    Ok(())
}

async fn run_script(sim: &mut Simulation, path: &Path) -> Result<()> {
    let script = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    for (idx, line) in script.lines().enumerate() {
        match run_line(sim, line).await {
            Err(Error::Err(e)) => {
                return Err(e.context(format!("line {}", idx + 1)).into());
            }
            other => other?,
        }
    }
    Ok(())
}

async fn command_mode(sim: &mut Simulation) -> Result<()> {
    let mut reed = Reedline::create();
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("scara".to_owned()),
        DefaultPromptSegment::Empty,
    );
    loop {
        let line = match reed.read_line(&prompt)? {
            reedline::Signal::Success(s) => s,
            reedline::Signal::CtrlC | reedline::Signal::CtrlD => return Err(Error::Exit),
        };
        match run_line(sim, &line).await {
            Err(Error::Err(e)) => eprintln!("error: {e:#}"),
            other => other?,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => MachineConfig::default(),
    };
    log::debug!("machine config: {config:?}");
    let mut sim = Simulation::new(config);
    println!("home at {:?}", sim.kinematics.config.home_point());

    let res = match &args.script {
        Some(path) => run_script(&mut sim, path).await,
        None => command_mode(&mut sim).await,
    };
    match res {
        Ok(()) | Err(Error::Exit) => Ok(()),
        Err(Error::Err(e)) => Err(e),
    }
}
