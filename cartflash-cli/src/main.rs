//! cartflash CLI - Command-line tool for writing Arduboy flash cartridges.
//!
//! ## Features
//!
//! - Write page-aligned binary images to a flash cart over the serial
//!   bootloader, with automatic reset out of application firmware
//! - Probe the cart's JEDEC identity without writing
//! - Optional image patching for SSD1309 display variants
//! - Interactive board selection and a remembered preferred port
//! - Shell completion generation
//!
//! ## Exit codes
//!
//! Every failure kind maps to a distinct exit code for scriptability:
//! 0 success, 1 other, 2 usage, 10 image file not found, 11 unusable
//! image (misaligned size / out of address range), 12 no board found,
//! 13 board never re-enumerated after reset, 14 incompatible bootloader,
//! 15 no/unstable flash cart, 16 serial transport error, 17 interrupted.

use anyhow::{Context, Result};
use cartflash::{
    BootSession, CartFlasher, CartInfo, ConnectOptions, FlashImage, NativePort,
    NativePortEnumerator, PortEnumerator, PROTOCOL_BAUD, SerialConfig, match_ports,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

mod config;
mod serial;

use config::Config;
use serial::{SelectOptions, Target, select_target};

/// Delay before exiting on terminal paths, so a double-click launch does
/// not vanish before the message can be read.
const EXIT_DELAY: Duration = Duration::from_secs(2);

/// Default re-enumeration timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Whether Ctrl-C was received.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// CLI-layer errors with a dedicated exit code class.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation or ambiguous setup; maps to exit code 2.
    #[error("{0}")]
    Usage(String),
}

/// Exit codes, one per failure kind.
mod exit_codes {
    pub const USAGE: i32 = 2;
    pub const FILE_NOT_FOUND: i32 = 10;
    pub const BAD_IMAGE: i32 = 11;
    pub const NO_DEVICE: i32 = 12;
    pub const NO_REENUMERATION: i32 = 13;
    pub const OLD_BOOTLOADER: i32 = 14;
    pub const NO_FLASH_CART: i32 = 15;
    pub const TRANSPORT: i32 = 16;
    pub const INTERRUPTED: i32 = 17;
}

/// cartflash - write flash cartridges on Arduboy handhelds.
///
/// Environment variables:
///   CARTFLASH_PORT     - Default serial port
///   CARTFLASH_TIMEOUT  - Re-enumeration timeout in seconds
#[derive(Parser)]
#[command(name = "cartflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "CARTFLASH_PORT")]
    port: Option<String>,

    /// Seconds to wait for the board to re-enumerate after reset.
    #[arg(short, long, global = true, env = "CARTFLASH_TIMEOUT")]
    timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "CARTFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Skip the short pause before exiting.
    #[arg(long, global = true)]
    no_delay: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a flash image to the cart.
    Flash {
        /// Path to the page-aligned flash image.
        image: PathBuf,

        /// Base page address (any integer base: 0x1F0, 0o770, 0b111, 496).
        #[arg(short, long, default_value = "0", value_parser = parse_page_address)]
        address: u16,

        /// Patch the image for SSD1309 display variants before writing.
        #[arg(long)]
        ssd1309: bool,
    },

    /// Identify the cart's flash chip without writing.
    Probe,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a page address in any common integer base notation.
///
/// Supports `0x`/`0o`/`0b` prefixes, plain decimal, and underscore
/// separators, mirroring integer literal syntax.
fn parse_page_address(s: &str) -> Result<u16, String> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
    let (digits, radix) = if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(oct) = cleaned.strip_prefix("0o").or_else(|| cleaned.strip_prefix("0O")) {
        (oct, 8)
    } else if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (cleaned.as_str(), 10)
    };

    u16::from_str_radix(digits, radix).map_err(|e| format!("invalid page address '{s}': {e}"))
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Ctrl-C aborts between blocks rather than mid-command.
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    cartflash::set_interrupt_checker(was_interrupted);

    debug!("cartflash v{}", env!("CARGO_PKG_VERSION"));

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let code = match run(&cli, &config) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };

    maybe_pause(&cli, code);
    std::process::exit(code);
}

/// Map an error chain to its exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    use cartflash::Error as LibError;

    if err.downcast_ref::<CliError>().is_some() {
        return exit_codes::USAGE;
    }

    if let Some(e) = err.downcast_ref::<LibError>() {
        return match e {
            LibError::Io(cause) if cause.kind() == io::ErrorKind::NotFound => {
                exit_codes::FILE_NOT_FOUND
            },
            LibError::MisalignedImage { .. } | LibError::AddressOverflow { .. } => {
                exit_codes::BAD_IMAGE
            },
            LibError::DeviceNotFound => exit_codes::NO_DEVICE,
            LibError::ResetTimeout(_) => exit_codes::NO_REENUMERATION,
            LibError::IncompatibleBootloader { .. } => exit_codes::OLD_BOOTLOADER,
            LibError::UnstableChipId { .. } => exit_codes::NO_FLASH_CART,
            LibError::Io(_) | LibError::Serial(_) | LibError::Protocol(_) => {
                exit_codes::TRANSPORT
            },
            LibError::Cancelled(_) => exit_codes::INTERRUPTED,
        };
    }

    1
}

/// Hold the final message on screen for device-flow and failure paths.
fn maybe_pause(cli: &Cli, code: i32) {
    if cli.no_delay || !STDERR_IS_TTY.load(Ordering::Relaxed) {
        return;
    }
    let device_flow = matches!(cli.command, Commands::Flash { .. } | Commands::Probe);
    if device_flow || code != 0 {
        thread::sleep(EXIT_DELAY);
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            image,
            address,
            ssd1309,
        } => cmd_flash(cli, config, image, *address, *ssd1309),
        Commands::Probe => cmd_probe(cli, config),
        Commands::ListPorts { json } => cmd_list_ports(*json),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Resolve connection tunables from CLI args and config.
fn connect_options(cli: &Cli, config: &Config) -> ConnectOptions {
    let secs = cli
        .timeout
        .or(config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    ConnectOptions::default().with_reset_timeout(Duration::from_secs(secs))
}

/// Select a target and bring it into bootloader mode.
fn open_session(cli: &Cli, config: &Config) -> Result<BootSession<NativePort>> {
    let options = SelectOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    let opts = connect_options(cli, config);

    match select_target(&options, config)? {
        Target::Board(handle) => {
            if !cli.quiet {
                eprintln!(
                    "{} Found {} ({}) at {}",
                    style("✔").green(),
                    handle.board,
                    handle.mode,
                    style(&handle.port).cyan()
                );
                eprintln!("{} Waiting for bootloader...", style("⏳").yellow());
            }
            Ok(cartflash::enter_bootloader_with(handle, &opts)?)
        },
        Target::RawPort(name) => {
            warn!("{name} matches no known board; assuming it is already in bootloader mode");
            let serial = SerialConfig::new(&name, PROTOCOL_BAUD).with_timeout(opts.io_timeout);
            Ok(BootSession::new(NativePort::open(&serial)?))
        },
    }
}

fn print_cart_info(info: &CartInfo) {
    eprintln!();
    eprintln!("Flash cart JEDEC ID    : {}", style(info.identity).cyan());
    eprintln!(
        "Flash cart Manufacturer: {}",
        info.identity.manufacturer_name()
    );
    eprintln!(
        "Flash cart capacity    : {} KiB",
        info.identity.capacity_bytes() / 1024
    );
    eprintln!();
}

/// Flash command implementation.
fn cmd_flash(
    cli: &Cli,
    config: &Config,
    image_path: &PathBuf,
    address: u16,
    ssd1309: bool,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Reading flash image from {}",
            style("📦").cyan(),
            style(image_path.display()).cyan()
        );
    }

    let mut image = FlashImage::from_file(image_path)
        .with_context(|| format!("reading flash image {}", image_path.display()))?;

    // Bad input must never reach the device, let alone partially write.
    image.validate()?;

    if ssd1309 {
        let patched = image.patch_ssd1309();
        if !cli.quiet {
            eprintln!(
                "{} Patched {patched} display init sequence(s) for SSD1309",
                style("🩹").cyan()
            );
        }
    }

    let total_blocks = cartflash::block_plan(image.len(), address)?.len();

    let session = open_session(cli, config)?;
    let mut flasher = CartFlasher::new(session);

    let info = flasher.probe()?;
    if !cli.quiet {
        print_cart_info(&info);
    }
    if !info.fits(image.len(), address) {
        warn!(
            "image of {} bytes at page {address} exceeds the cart's {} byte capacity",
            image.len(),
            info.identity.capacity_bytes()
        );
    }

    // Progress bar over blocks
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total_blocks as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let started = Instant::now();
    flasher.write_image(&image, address, |done, _total| {
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    if !cli.quiet {
        eprintln!(
            "{} Done in {:.2}s",
            style("🎉").green().bold(),
            started.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

/// Probe command implementation.
fn cmd_probe(cli: &Cli, config: &Config) -> Result<()> {
    let session = open_session(cli, config)?;
    let mut flasher = CartFlasher::new(session);

    let info = flasher.probe()?;
    print_cart_info(&info);
    eprintln!("Bootloader version     : {}", info.version);

    flasher.exit()?;
    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;
    let boards = match_ports(&ports);
    let board_for = |name: &str| boards.iter().find(|b| b.port == name);

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                let board = board_for(&p.name);
                serde_json::json!({
                    "name": p.name,
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                    "board": board.map(|b| b.board),
                    "mode": board.map(|b| b.mode.to_string()),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("none found").dim());
        return Ok(());
    }

    for port in &ports {
        let board_info = match board_for(&port.name) {
            Some(b) => format!(" [{} - {}]", style(b.board).yellow(), b.mode),
            None => match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
                _ => String::new(),
            },
        };

        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            board_info,
            product
        );
    }

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
