//! Line Console
//!
//! Parses the one-line commands the bundled binaries read from stdin.
//!
//! ```text
//! new [title]            create a panel          (primary)
//! rm <panel>             delete a panel          (primary)
//! rename <panel> <title> rename a panel          (primary)
//! code <panel> <source>  replace panel source    (primary)
//! move <panel> <x> <y>   move a panel            (primary)
//! master <source>        replace master source   (primary)
//! eval-master            evaluate the master     (primary)
//! compact on|off         collapse the master     (primary)
//! play|pause|toggle|update <panel>
//! stop | update-all
//! slider master <id> <value>
//! slider <panel> <id> <value>
//! list | help | quit
//! ```

use thiserror::Error;

use crate::model::{PanelConfig, SliderScope};
use crate::protocol::{CommandMessage, PanelId, Position};

use super::primary::LocalCommand;

/// Usage text printed by `help`
pub const HELP: &str = "\
commands:
  play|pause|toggle|update <panel>   control a panel
  stop                               stop every panel
  update-all                         re-evaluate stale panels
  slider master <id> <value>         move a master slider
  slider <panel> <id> <value>        move a panel slider
  list                               show panels
  quit                               exit
primary only:
  new [title]  rm <panel>  rename <panel> <title>  code <panel> <source>
  move <panel> <x> <y>  master <source>  eval-master  compact on|off";

/// A console line that could not be parsed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    /// Nothing but whitespace
    #[error("empty command")]
    Empty,

    /// First word is not a command
    #[error("unknown command: {0}")]
    Unknown(String),

    /// Command is known but its arguments are wrong
    #[error("usage: {0}")]
    Usage(&'static str),

    /// Argument should have been a number
    #[error("not a number: {0}")]
    InvalidNumber(String),

    /// Command exists only on the primary
    #[error("{0} is only available on the primary")]
    PrimaryOnly(String),
}

/// A parsed console line
#[derive(Debug)]
pub enum ConsoleCommand<T> {
    /// Operation to run
    Run(T),
    /// Print the panel list
    List,
    /// Print usage
    Help,
    /// Exit
    Quit,
}

/// Parse a primary console line
///
/// # Errors
///
/// Returns a [`ConsoleError`] describing the problem.
pub fn parse_primary(line: &str) -> Result<ConsoleCommand<LocalCommand>, ConsoleError> {
    let (word, rest) = split_word(line).ok_or(ConsoleError::Empty)?;

    let command = match word {
        "new" => LocalCommand::CreatePanel {
            config: if rest.is_empty() {
                PanelConfig::default()
            } else {
                PanelConfig::titled(rest)
            },
            reply: None,
        },
        "rm" => LocalCommand::DeletePanel(panel_arg(rest, "rm <panel>")?),
        "rename" => {
            let (id, title) = split_word(rest).ok_or(ConsoleError::Usage("rename <panel> <title>"))?;
            if title.is_empty() {
                return Err(ConsoleError::Usage("rename <panel> <title>"));
            }
            LocalCommand::RenamePanel {
                id: PanelId::from(id),
                title: title.to_string(),
            }
        }
        "code" => {
            let (id, code) = split_word(rest).ok_or(ConsoleError::Usage("code <panel> <source>"))?;
            LocalCommand::SetPanelCode {
                id: PanelId::from(id),
                code: code.to_string(),
            }
        }
        "move" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            let [id, x, y] = args.as_slice() else {
                return Err(ConsoleError::Usage("move <panel> <x> <y>"));
            };
            LocalCommand::MovePanel {
                id: PanelId::from(*id),
                position: Some(Position::new(number(x)?, number(y)?)),
                size: None,
            }
        }
        "master" => LocalCommand::SetMasterCode(rest.to_string()),
        "eval-master" => LocalCommand::EvaluateMaster,
        "compact" => match rest {
            "on" => LocalCommand::SetMasterCompact(true),
            "off" => LocalCommand::SetMasterCompact(false),
            _ => return Err(ConsoleError::Usage("compact on|off")),
        },
        _ => {
            return Ok(match parse_shared(word, rest)? {
                ConsoleCommand::Run(command) => ConsoleCommand::Run(local_from_command(command)),
                ConsoleCommand::List => ConsoleCommand::List,
                ConsoleCommand::Help => ConsoleCommand::Help,
                ConsoleCommand::Quit => ConsoleCommand::Quit,
            })
        }
    };
    Ok(ConsoleCommand::Run(command))
}

/// Parse a remote console line
///
/// # Errors
///
/// Returns a [`ConsoleError`] describing the problem.
pub fn parse_remote(line: &str) -> Result<ConsoleCommand<CommandMessage>, ConsoleError> {
    let (word, rest) = split_word(line).ok_or(ConsoleError::Empty)?;
    match word {
        "new" | "rm" | "rename" | "code" | "move" | "master" | "eval-master" | "compact" => {
            Err(ConsoleError::PrimaryOnly(word.to_string()))
        }
        _ => parse_shared(word, rest),
    }
}

fn parse_shared(word: &str, rest: &str) -> Result<ConsoleCommand<CommandMessage>, ConsoleError> {
    let command = match word {
        "play" => CommandMessage::PanelPlay {
            panel: panel_arg(rest, "play <panel>")?,
        },
        "pause" => CommandMessage::PanelPause {
            panel: panel_arg(rest, "pause <panel>")?,
        },
        "toggle" => CommandMessage::PanelToggle {
            panel: panel_arg(rest, "toggle <panel>")?,
        },
        "update" => CommandMessage::PanelUpdate {
            panel: panel_arg(rest, "update <panel>")?,
        },
        "stop" => CommandMessage::StopAll,
        "update-all" => CommandMessage::UpdateAll,
        "slider" => parse_slider(rest)?,
        "list" | "ls" => return Ok(ConsoleCommand::List),
        "help" | "?" => return Ok(ConsoleCommand::Help),
        "quit" | "exit" => return Ok(ConsoleCommand::Quit),
        other => return Err(ConsoleError::Unknown(other.to_string())),
    };
    Ok(ConsoleCommand::Run(command))
}

fn parse_slider(rest: &str) -> Result<CommandMessage, ConsoleError> {
    const USAGE: &str = "slider master|<panel> <id> <value>";
    let args: Vec<&str> = rest.split_whitespace().collect();
    let [owner, slider_id, value] = args.as_slice() else {
        return Err(ConsoleError::Usage(USAGE));
    };
    let value = number(value)?;
    let slider_id = (*slider_id).to_string();
    Ok(if *owner == "master" {
        CommandMessage::MasterSliderChange { slider_id, value }
    } else {
        CommandMessage::PanelSliderChange {
            panel_id: PanelId::from(*owner),
            slider_id,
            value,
        }
    })
}

/// The primary applies remote-style commands to itself as local ones
fn local_from_command(command: CommandMessage) -> LocalCommand {
    match command {
        CommandMessage::PanelPlay { panel } => LocalCommand::Play(panel),
        CommandMessage::PanelPause { panel } => LocalCommand::Pause(panel),
        CommandMessage::PanelToggle { panel } => LocalCommand::Toggle(panel),
        CommandMessage::PanelUpdate { panel } => LocalCommand::Update(panel),
        CommandMessage::StopAll => LocalCommand::StopAll,
        CommandMessage::UpdateAll => LocalCommand::UpdateAll,
        CommandMessage::MasterSliderChange { slider_id, value } => LocalCommand::SliderChange {
            scope: SliderScope::Master,
            slider_id,
            value,
        },
        CommandMessage::PanelSliderChange {
            panel_id,
            slider_id,
            value,
        } => LocalCommand::SliderChange {
            scope: SliderScope::Panel(panel_id),
            slider_id,
            value,
        },
    }
}

fn split_word(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    })
}

fn panel_arg(rest: &str, usage: &'static str) -> Result<PanelId, ConsoleError> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [id] => Ok(PanelId::from(*id)),
        _ => Err(ConsoleError::Usage(usage)),
    }
}

fn number(raw: &str) -> Result<f64, ConsoleError> {
    raw.parse()
        .map_err(|_| ConsoleError::InvalidNumber(raw.to_string()))
}
