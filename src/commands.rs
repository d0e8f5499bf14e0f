//! Line-oriented command surface, read from stdin.
//!
//! ```text
//! select <n|all>      limit per-monitor updates to one monitor
//! update              render one frame now
//! timer start <secs>  periodic extra renders
//! timer stop
//! status
//! reload              reload widget folders
//! quit                restore the original wallpaper and exit
//! ```

use std::{str::FromStr, time::Duration};

use crate::{
    error::{LivepaperError, Result},
    pipeline::MonitorSelection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Select(MonitorSelection),
    Update,
    TimerStart(Duration),
    TimerStop,
    Status,
    Reload,
    Quit,
}

impl FromStr for Command {
    type Err = LivepaperError;

    fn from_str(line: &str) -> Result<Self> {
        let lower = line.trim().to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        let invalid = || LivepaperError::InvalidCommand(line.trim().to_string());

        match words.as_slice() {
            ["select", "all" | "*"] => Ok(Self::Select(MonitorSelection::All)),
            ["select", n] => n
                .parse()
                .map(|i| Self::Select(MonitorSelection::Index(i)))
                .map_err(|_| invalid()),
            ["update" | "refresh"] => Ok(Self::Update),
            ["timer", "start", secs] => match secs.parse::<u64>() {
                Ok(s) if s > 0 => Ok(Self::TimerStart(Duration::from_secs(s))),
                _ => Err(invalid()),
            },
            ["timer", "stop"] => Ok(Self::TimerStop),
            ["status"] => Ok(Self::Status),
            ["reload"] => Ok(Self::Reload),
            ["quit" | "exit" | "restore"] => Ok(Self::Quit),
            _ => Err(invalid()),
        }
    }
}

/// Human-readable result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub message: String,
    pub quit: bool,
}

impl CommandReply {
    pub fn say(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            quit: false,
        }
    }

    pub fn quit(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            quit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        assert_eq!("select all".parse::<Command>().unwrap(), Command::Select(MonitorSelection::All));
        assert_eq!(
            " SELECT 2 ".parse::<Command>().unwrap(),
            Command::Select(MonitorSelection::Index(2))
        );
        assert_eq!("update".parse::<Command>().unwrap(), Command::Update);
        assert_eq!(
            "timer start 15".parse::<Command>().unwrap(),
            Command::TimerStart(Duration::from_secs(15))
        );
        assert_eq!("timer stop".parse::<Command>().unwrap(), Command::TimerStop);
        assert_eq!("status".parse::<Command>().unwrap(), Command::Status);
        assert_eq!("reload".parse::<Command>().unwrap(), Command::Reload);
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in ["", "select", "select -1", "timer start 0", "timer start x", "dance"] {
            assert!(
                matches!(line.parse::<Command>(), Err(LivepaperError::InvalidCommand(_))),
                "accepted {line:?}"
            );
        }
    }
}
