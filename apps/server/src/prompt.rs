//! The interactive command prompt.
//!
//! When attached to a terminal (and not daemonized or started with `-Z`),
//! stdin accepts runtime commands: per-facility debug level changes
//! (`sdbg`, `odbg`, `pdbg`, `wdbg`, `mdbg`, `qdbg`, `udbg` with a level
//! argument), `save <file>` to write the current configuration, and
//! `exit`.

use std::path::PathBuf;

use slimcast_core::LogLevel;
use tokio::sync::mpsc;

/// A parsed prompt command.
#[derive(Debug, PartialEq, Eq)]
pub enum PromptCommand {
    Exit,
    Save(PathBuf),
    /// Change a facility's log level at runtime.
    Debug(Facility, LogLevel),
}

/// Log facilities addressable from the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Stream,
    Output,
    Slimproto,
    Web,
    Main,
    Bridge,
    Upnp,
}

/// Parses one prompt line; unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<PromptCommand> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    match cmd {
        "exit" => Some(PromptCommand::Exit),
        "save" => parts.next().map(|name| PromptCommand::Save(PathBuf::from(name))),
        _ => {
            let facility = match cmd {
                "sdbg" => Facility::Stream,
                "odbg" => Facility::Output,
                "pdbg" => Facility::Slimproto,
                "wdbg" => Facility::Web,
                "mdbg" => Facility::Main,
                "qdbg" => Facility::Bridge,
                "udbg" => Facility::Upnp,
                _ => return None,
            };
            let level = LogLevel::parse(parts.next()?);
            Some(PromptCommand::Debug(facility, level))
        }
    }
}

/// Spawns the blocking stdin reader; parsed commands arrive on the
/// returned channel. The task ends when stdin closes.
pub fn spawn() -> mpsc::UnboundedReceiver<PromptCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match std::io::BufRead::read_line(&mut stdin.lock(), &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if let Some(command) = parse_command(&line) {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_debug_commands() {
        assert_eq!(
            parse_command("sdbg debug"),
            Some(PromptCommand::Debug(Facility::Stream, LogLevel::Debug))
        );
        assert_eq!(
            parse_command("udbg sdebug"),
            Some(PromptCommand::Debug(Facility::Upnp, LogLevel::Sdebug))
        );
        assert_eq!(
            parse_command("qdbg info"),
            Some(PromptCommand::Debug(Facility::Bridge, LogLevel::Info))
        );
    }

    #[test]
    fn parses_save_and_exit() {
        assert_eq!(parse_command("exit"), Some(PromptCommand::Exit));
        assert_eq!(
            parse_command("save my.xml"),
            Some(PromptCommand::Save(PathBuf::from("my.xml")))
        );
        assert_eq!(parse_command("save"), None);
    }

    #[test]
    fn rejects_unknown_input() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("bogus"), None);
        assert_eq!(parse_command("sdbg"), None);
    }
}
