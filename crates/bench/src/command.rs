use anyhow::{anyhow, bail, Context as _};
use scara_protocol::{MachineMode, SpindleState};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Spindle(SpindleState, f32),
    Override(u8),
    Abort,
    Reset,
    Mode(MachineMode),
    Move(f32, f32, f32),
    AngleMode(bool),
    Where,
    Status,
    Quit,
}

fn number<T: std::str::FromStr>(word: Option<&str>, what: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let word = word.ok_or_else(|| anyhow!("expected {what}"))?;
    word.parse()
        .with_context(|| format!("expected {what}, got {word:?}"))
}

/// Parses one line of input. Blank lines and comments give `None`.
pub fn parse(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.split('#').next().unwrap_or_default().trim();
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(None);
    };

    let ret = match cmd {
        "spindle" => {
            let state = match words.next() {
                Some("cw") => SpindleState::Clockwise,
                Some("ccw") => SpindleState::Counterclockwise,
                Some("off") => SpindleState::Disabled,
                other => bail!("expected cw, ccw or off, got {other:?}"),
            };
            let rpm: f32 = match words.next() {
                Some(w) => number(Some(w), "a speed")?,
                None => 0.0,
            };
            if !rpm.is_finite() {
                bail!("expected a speed, got {rpm}");
            }
            Command::Spindle(state, rpm)
        }
        "override" => Command::Override(number(words.next(), "a percentage")?),
        "abort" => Command::Abort,
        "reset" => Command::Reset,
        "mode" => Command::Mode(match words.next() {
            Some("idle") => MachineMode::Idle,
            Some("run") => MachineMode::Cycle,
            Some("hold") => MachineMode::Hold,
            Some("check") => MachineMode::CheckMode,
            Some("alarm") => MachineMode::Alarm,
            other => bail!("unknown mode {other:?}"),
        }),
        "move" => Command::Move(
            number(words.next(), "x")?,
            number(words.next(), "y")?,
            number(words.next(), "z")?,
        ),
        "angle-mode" => Command::AngleMode(match words.next() {
            Some("on") => true,
            Some("off") => false,
            other => bail!("expected on or off, got {other:?}"),
        }),
        "where" => Command::Where,
        "status" => Command::Status,
        "quit" => Command::Quit,
        other => bail!("unknown command {other:?}"),
    };

    if let Some(extra) = words.next() {
        bail!("unexpected {extra:?} after {cmd}");
    }
    Ok(Some(ret))
}
