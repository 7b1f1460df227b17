//! boardlink - Talk to microcontroller boards over USB serial
//!
//! The host side of a board link: finds a supported board among the USB
//! serial devices, makes sure it runs compatible firmware (building and
//! flashing it with `arduino-cli` when needed) and drives its pins, memory,
//! serial port and board-specific operations.
//!
//! # Architecture
//!
//! - **Board profiles** (RON) describe each board: USB identities, line
//!   parameters, toolchain target, pins and extra operations
//! - **Backends** provide the endpoints (real serial ports, or simulated
//!   boards) and the firmware pipeline
//! - **Link manager** connects, flashes and reconnects; every command here
//!   goes through one `Board` connection

mod backends;
mod cli;
mod commands;

use boardlink_core::profile::{BoardProfile, ProfileDatabase};
use boardlink_link::{Board, ConnectOptions, FlashPolicy, LinkConfig, LinkManager};
use clap::Parser;
use cli::{Cli, Commands, ConnectArgs, MemoryCommands, PinCommands, SerialCommands};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let db = match load_profiles(cli.boards.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load board profiles: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("Loaded {} board profiles", db.len());

    let config = match &cli.config {
        Some(path) => LinkConfig::from_toml_file(path)?,
        None => LinkConfig::default(),
    };

    match cli.command {
        Commands::Boards => {
            commands::list_boards(&db);
            return Ok(());
        }
        Commands::Backends => {
            commands::list_backends();
            return Ok(());
        }
        _ => {}
    }

    let (backend, pipeline) = backends::open_backend(&cli.backend, &db, &config)?;
    let simulated = backend.name() == "dummy";
    let manager = LinkManager::new(backend, pipeline, config);
    let ctx = Context {
        db: &db,
        manager: &manager,
        simulated,
    };

    match cli.command {
        Commands::Boards | Commands::Backends => Ok(()),
        Commands::Ports { board } => {
            let profile = match board.as_deref() {
                Some(id) => Some(ctx.profile(id)?),
                None => None,
            };
            commands::list_ports(&db, &manager, profile)
        }
        Commands::Build { board, firmware } => {
            commands::flash::cmd_build(&manager, ctx.profile(&board)?, &firmware).await
        }
        Commands::Flash {
            board,
            firmware,
            port,
        } => {
            let profile = ctx.profile(&board)?;
            let port = port.or_else(|| ctx.default_port(profile));
            commands::flash::cmd_flash(&manager, profile, port.as_deref(), &firmware).await
        }
        Commands::Pin(cmd) => match cmd {
            PinCommands::Mode { connect, pin, mode } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_pin_mode(&board, &pin, mode).await
            }
            PinCommands::Write {
                connect,
                pin,
                level,
            } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_pin_write(&board, &pin, level).await
            }
            PinCommands::Pwm { connect, pin, duty } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_pwm(&board, &pin, duty).await
            }
            PinCommands::Servo {
                connect,
                pin,
                angle,
            } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_servo(&board, &pin, angle).await
            }
            PinCommands::Read { connect, pin } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_pin_read(&board, &pin).await
            }
            PinCommands::Analog { connect, pin } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_analog_read(&board, &pin).await
            }
        },
        Commands::Memory(cmd) => match cmd {
            MemoryCommands::Read { connect, address } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_memory_read(&board, address).await
            }
            MemoryCommands::Write {
                connect,
                address,
                value,
            } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_memory_write(&board, address, value).await
            }
        },
        Commands::Serial(cmd) => match cmd {
            SerialCommands::Print {
                connect,
                text,
                newline,
            } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_serial_print(&board, &text, newline).await
            }
            SerialCommands::Available { connect } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_serial_available(&board).await
            }
            SerialCommands::Read { connect } => {
                let board = ctx.connect(&connect).await?;
                commands::io::cmd_serial_read(&board).await
            }
        },
        Commands::Ext {
            connect,
            name,
            args,
        } => {
            let board = ctx.connect(&connect).await?;
            commands::io::cmd_extension(&board, &name, &args).await
        }
    }
}

struct Context<'a> {
    db: &'a ProfileDatabase,
    manager: &'a LinkManager,
    simulated: bool,
}

impl Context<'_> {
    fn profile(&self, id: &str) -> Result<&BoardProfile, Box<dyn std::error::Error>> {
        self.db.get(id).ok_or_else(|| {
            let known: Vec<&str> = self.db.iter().map(|p| p.id.as_str()).collect();
            format!("Unknown board: {} [available: {}]", id, known.join(", ")).into()
        })
    }

    /// Simulated boards share USB identities, so pick the one made for the
    /// profile
    fn default_port(&self, profile: &BoardProfile) -> Option<String> {
        self.simulated.then(|| format!("dummy:{}", profile.id))
    }

    async fn connect(&self, args: &ConnectArgs) -> Result<Board, Box<dyn std::error::Error>> {
        let profile = self.profile(&args.board)?;
        let policy = if args.firmware.is_some() {
            FlashPolicy::IfStale
        } else {
            FlashPolicy::Never
        };
        let options = ConnectOptions {
            policy,
            firmware: args.firmware.clone(),
            path: args.port.clone().or_else(|| self.default_port(profile)),
        };
        let board = self.manager.connect(profile, options).await?;
        log::info!(
            "Connected to {} at {}",
            profile.name,
            board.path().unwrap_or("?")
        );
        Ok(board)
    }
}

/// Load the builtin profiles plus any from `extra`
fn load_profiles(extra: Option<&Path>) -> Result<ProfileDatabase, Box<dyn std::error::Error>> {
    let mut db = ProfileDatabase::builtin()?;

    if let Some(path) = extra {
        if path.is_dir() {
            let count = db.load_dir(path)?;
            log::debug!("Loaded {} profiles from {}", count, path.display());
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(format!("Board profile path not found: {}", path.display()).into());
        }
    }

    Ok(db)
}
