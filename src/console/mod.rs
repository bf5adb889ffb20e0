//! # Operator Console
//!
//! Line-oriented commands on stdin for inspecting and changing the gateway
//! while it runs. Every command answers with `OK` or an `Error: ...` line.
//!
//! ```text
//! > set gid2 321
//! OK
//! > log 2
//! --- Log Entries ---
//! [2024-05-01 12:00:03] ID1=123, ID2=321, LAT=40.376123, LON=49.850848, VBAT=3420
//! [2024-05-01 12:00:09] ID1=123, ID2=321, LAT=40.376130, LON=49.850851, VBAT=3418
//! ------------------
//! OK
//! ```

use std::fs;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::gateway::events::{EventSender, GatewayEvent};
use crate::gateway::SharedState;
use crate::settings::{MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ};

/// Command names and their help text
pub const COMMANDS: &[(&str, &str)] = &[
    ("set", "'set gid2 VALUE' or 'set gfreq VALUE' or 'set gp2p_key VALUE'"),
    ("info", "print current settings"),
    ("help", "show this text"),
    ("log", "show log entries, optional: 'log NUMBER' to show last N entries"),
    ("clearlog", "clear all log entries"),
    ("savelog", "force save log entries to storage"),
    ("mem", "show memory usage statistics"),
    ("exit", "exit application"),
];

/// Length of a hex-encoded pre-shared key
const KEY_HEX_LEN: usize = 64;

/// Page size assumed when converting `/proc/self/statm`
const PAGE_SIZE: u64 = 4096;

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    SetDeviceId2(u32),
    SetFrequency(u32),
    SetPresharedKey(String),
    Info,
    Help,
    ShowLog(Option<usize>),
    ClearLog,
    SaveLog,
    Memory,
    Exit,
}

/// Why a console line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command")]
    UnknownCommand,

    #[error("Unknown parameter")]
    UnknownParameter,

    #[error("Expected numeric argument for {0}")]
    ExpectedNumber(&'static str),

    #[error("Invalid frequency, expected value in Hz between 100MHz and 1000MHz")]
    InvalidFrequency,

    #[error("Expected 64 character hexadecimal string for p2p_key")]
    InvalidKey,
}

impl ConsoleCommand {
    /// Parse one input line; blank lines yield `Ok(None)`
    ///
    /// # Examples
    ///
    /// ```
    /// use loko_gateway::console::ConsoleCommand;
    ///
    /// assert_eq!(
    ///     ConsoleCommand::parse("set gid2 321"),
    ///     Ok(Some(ConsoleCommand::SetDeviceId2(321)))
    /// );
    /// assert_eq!(ConsoleCommand::parse("   "), Ok(None));
    /// ```
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = parts.collect();

        let command = match name {
            "set" => Self::parse_set(&args)?,
            "info" => Self::Info,
            "help" => Self::Help,
            "log" => match args.first() {
                Some(count) => Self::ShowLog(Some(
                    count
                        .parse()
                        .map_err(|_| CommandError::ExpectedNumber("number of entries"))?,
                )),
                None => Self::ShowLog(None),
            },
            "clearlog" => Self::ClearLog,
            "savelog" => Self::SaveLog,
            "mem" => Self::Memory,
            "exit" => Self::Exit,
            _ => return Err(CommandError::UnknownCommand),
        };
        Ok(Some(command))
    }

    fn parse_set(args: &[&str]) -> Result<Self, CommandError> {
        let (Some(&tag), value) = (args.first(), args.get(1).copied()) else {
            return Err(CommandError::UnknownParameter);
        };

        match tag {
            "gid2" => value
                .and_then(|v| v.parse().ok())
                .map(Self::SetDeviceId2)
                .ok_or(CommandError::ExpectedNumber("gid2")),
            "gfreq" => {
                let freq: u32 = value
                    .and_then(|v| v.parse().ok())
                    .ok_or(CommandError::ExpectedNumber("gfreq"))?;
                if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&freq) {
                    return Err(CommandError::InvalidFrequency);
                }
                Ok(Self::SetFrequency(freq))
            }
            "gp2p_key" => {
                let key = value.ok_or(CommandError::InvalidKey)?;
                if key.len() != KEY_HEX_LEN || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(CommandError::InvalidKey);
                }
                Ok(Self::SetPresharedKey(key.to_string()))
            }
            _ => Err(CommandError::UnknownParameter),
        }
    }
}

/// Result of running one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    /// The console should stop reading
    pub exit: bool,
}

impl Reply {
    fn ok(mut lines: Vec<String>) -> Self {
        lines.push("OK".to_string());
        Self { lines, exit: false }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            lines: vec![format!("Error: {}", message)],
            exit: false,
        }
    }
}

/// Console bound to the gateway's shared state
#[derive(Debug, Clone)]
pub struct Console {
    shared: SharedState,
    events: EventSender,
}

impl Console {
    pub fn new(shared: SharedState, events: EventSender) -> Self {
        Self { shared, events }
    }

    /// Parse and run one line
    pub async fn handle_line(&self, line: &str) -> Option<Reply> {
        match ConsoleCommand::parse(line) {
            Ok(Some(command)) => Some(self.execute(command).await),
            Ok(None) => None,
            Err(e) => Some(Reply::error(e)),
        }
    }

    /// Run a parsed command
    pub async fn execute(&self, command: ConsoleCommand) -> Reply {
        debug!("Console command: {:?}", command);

        match command {
            ConsoleCommand::SetDeviceId2(id2) => {
                let result = self.shared.settings.lock().await.set_device_id2(id2);
                Self::saved(result)
            }
            ConsoleCommand::SetFrequency(freq) => {
                let result = self.shared.settings.lock().await.set_frequency_hz(freq);
                Self::saved(result)
            }
            ConsoleCommand::SetPresharedKey(key) => {
                let result = self.shared.settings.lock().await.set_preshared_key_hex(&key);
                Self::saved(result)
            }
            ConsoleCommand::Info => {
                let store = self.shared.settings.lock().await;
                let settings = store.get();
                Reply::ok(vec![
                    "Settings:".to_string(),
                    format!("  Device ID (id2): {}", settings.device_id2),
                    format!("  Frequency: {} Hz", settings.radio_frequency_hz),
                    format!("  P2P Key: {}", settings.preshared_key_hex),
                ])
            }
            ConsoleCommand::Help => {
                let mut lines = vec!["Available commands:".to_string()];
                lines.extend(COMMANDS.iter().map(|(name, info)| format!("{} - {}", name, info)));
                Reply::ok(lines)
            }
            ConsoleCommand::ShowLog(count) => {
                let log = self.shared.log.lock().await;
                if log.is_empty() {
                    return Reply::ok(vec!["Log is empty".to_string()]);
                }

                let mut lines = vec!["--- Log Entries ---".to_string()];
                lines.extend(log.recent(count.unwrap_or(usize::MAX)).map(|entry| entry.to_string()));
                lines.push("------------------".to_string());
                Reply::ok(lines)
            }
            ConsoleCommand::ClearLog => match self.shared.log.lock().await.clear() {
                Ok(()) => Reply::ok(vec!["Log cleared".to_string()]),
                Err(e) => Reply::error(format!("Failed to clear log: {}", e)),
            },
            ConsoleCommand::SaveLog => self.save_log().await,
            ConsoleCommand::Memory => match memory_usage() {
                Some((resident, virtual_size)) => Reply::ok(vec![
                    "Memory Usage:".to_string(),
                    format!("  Resident: {} bytes", resident),
                    format!("  Virtual: {} bytes", virtual_size),
                ]),
                None => Reply::error("Memory statistics unavailable"),
            },
            ConsoleCommand::Exit => {
                let mut reply = self.save_log().await;
                if self.events.send(GatewayEvent::ExitRequested).is_err() {
                    warn!("Gateway loop already stopped");
                }
                reply.exit = true;
                reply
            }
        }
    }

    fn saved(result: crate::error::Result<()>) -> Reply {
        match result {
            Ok(()) => Reply::ok(Vec::new()),
            Err(e) => Reply::error(e),
        }
    }

    async fn save_log(&self) -> Reply {
        let log = self.shared.log.lock().await;
        let target = log
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "memory".to_string());

        match log.save() {
            Ok(()) => Reply::ok(vec![format!("Logs saved to {}", target)]),
            Err(e) => Reply::error(format!("Failed to save logs: {}", e)),
        }
    }

    /// Serve commands from `input` until end of input or `exit`
    pub async fn run<I, O>(self, input: I, mut output: O)
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        info!("Console ready, type 'help' for commands");

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            };

            let Some(reply) = self.handle_line(&line).await else {
                continue;
            };

            let mut text = reply.lines.join("\n");
            text.push('\n');
            if let Err(e) = output.write_all(text.as_bytes()).await {
                warn!("Console write failed: {}", e);
                break;
            }
            if let Err(e) = output.flush().await {
                warn!("Console flush failed: {}", e);
                break;
            }

            if reply.exit {
                break;
            }
        }
    }
}

/// Resident and virtual size of this process in bytes
fn memory_usage() -> Option<(u64, u64)> {
    let statm = fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace().map(|field| field.parse::<u64>().ok());
    let virtual_pages = fields.next()??;
    let resident_pages = fields.next()??;
    Some((resident_pages * PAGE_SIZE, virtual_pages * PAGE_SIZE))
}
