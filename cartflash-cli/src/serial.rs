//! Board selection.
//!
//! Resolves the target endpoint from, in order: an explicit `--port`, the
//! configured preferred port, then discovery. When several boards are
//! attached the selection is interactive (dialoguer) unless
//! `--non-interactive` asked for deterministic behavior, in which case
//! multiple candidates are a usage error.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    cartflash::{DeviceHandle, find_devices},
    console::style,
    dialoguer::{Confirm, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::io::IsTerminal,
};

/// Options for board selection.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// The resolved flashing target.
pub enum Target {
    /// A recognized board with a known firmware mode.
    Board(DeviceHandle),
    /// An explicitly named port that matched no signature; the caller
    /// must assume it is already in bootloader mode.
    RawPort(String),
}

fn usage_err(message: &str) -> anyhow::Error {
    // Usage-class failures map to CLI exit code 2 for script callers.
    CliError::Usage(message.to_string()).into()
}

fn resolve_named_port(name: &str, boards: &[DeviceHandle]) -> Target {
    match boards.iter().find(|b| b.port == name) {
        Some(board) => Target::Board(board.clone()),
        None => Target::RawPort(name.to_string()),
    }
}

/// Select the board (or raw port) to flash.
pub fn select_target(options: &SelectOptions, config: &Config) -> Result<Target> {
    let boards = find_devices();

    // If port explicitly specified, use it
    if let Some(name) = &options.port {
        return Ok(resolve_named_port(name, &boards));
    }

    // A configured preferred port wins while it is actually attached
    if let Some(name) = &config.port {
        if let Some(board) = boards.iter().find(|b| &b.port == name) {
            debug!("Using port from config: {name}");
            return Ok(Target::Board(board.clone()));
        }
        debug!("Configured port {name} not attached, discovering");
    }

    match boards.len() {
        0 => Err(cartflash::Error::DeviceNotFound.into()),
        1 => {
            let board = boards.into_iter().next().expect("one board");
            info!("Auto-selected {} at {}", board.board, board.port);
            Ok(Target::Board(board))
        },
        _ if options.non_interactive => Err(usage_err(
            "multiple boards attached; pass --port to pick one",
        )),
        _ => {
            ensure_interactive_terminal()?;
            select_board_interactive(boards, config)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "multiple boards attached and no terminal to prompt on; pass --port",
        ))
    }
}

fn select_board_interactive(boards: Vec<DeviceHandle>, config: &Config) -> Result<Target> {
    let items: Vec<String> = boards
        .iter()
        .map(|b| format!("{} [{}] ({})", b.port, b.board, b.mode))
        .collect();

    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Several boards attached, pick one")
        .items(&items)
        .default(0)
        .interact()?;

    let board = boards
        .into_iter()
        .nth(index)
        .expect("selected index is in range");

    ask_remember_port(&board.port, config);
    Ok(Target::Board(board))
}

/// Offer to persist the chosen port as the preferred one.
fn ask_remember_port(port: &str, config: &Config) {
    if config.port.is_some() {
        return;
    }

    let remember = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {port} as the default port?"))
        .default(false)
        .interact()
        .unwrap_or(false);

    if remember {
        let mut updated = config.clone();
        updated.port = Some(port.to_string());
        if let Err(e) = updated.save() {
            eprintln!(
                "{} could not save config: {e}",
                style("Warning:").yellow().bold()
            );
        }
    }
}
