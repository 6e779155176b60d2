//! buscast: command-line access to broadcast buses
//!
//! ## Configuration
//! - BUSCAST_CONFIG: YAML configuration file (optional)
//! - BUSCAST__DELIVERY, BUSCAST__MODE, BUSCAST__BUS_DIR: overrides
//! - BUSCAST_LOG: tracing filter (default: info, written to stderr)
//!
//! Messages are text: arguments are broadcast as UTF-8 and received messages
//! are printed one per line.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use buscast::config::{parse_mode, BusConfig};
use buscast::permissions::{resolve_group, resolve_user};
use buscast::utils::bootstrap::init_tracing;
use buscast::{
    chmod, chown, BusHandle, CreateFlags, Delivery, Flow, IoFlags, OpenFlags, Registry,
};

/// buscast - named cross-process broadcast buses
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a bus and print its path (anonymous if NAME is omitted)
    Create {
        name: Option<PathBuf>,
        /// Fail if the bus already exists
        #[arg(long)]
        excl: bool,
        /// Fail instead of retrying when interrupted by a signal
        #[arg(long)]
        intr: bool,
        /// Let broadcasters skip waiting for listeners
        #[arg(long)]
        fire_and_forget: bool,
        /// Octal file mode of the new bus
        #[arg(long)]
        mode: Option<String>,
    },
    /// Remove a bus name
    Unlink { name: PathBuf },
    /// Broadcast one message
    Broadcast {
        name: PathBuf,
        message: String,
        /// Fail instead of waiting for another broadcaster or a lagging listener
        #[arg(long)]
        nowait: bool,
    },
    /// Print received messages, one per line
    Listen {
        name: PathBuf,
        /// Exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Block until the next broadcast, then exit
    Wait { name: PathBuf },
    /// Change bus permissions
    Chmod { mode: String, name: PathBuf },
    /// Change bus owner (OWNER[:GROUP])
    Chown { owner: String, name: PathBuf },
    /// Change bus group
    Chgrp { group: String, name: PathBuf },
    /// Print the number of registered listeners
    Listeners { name: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Create {
            name,
            excl,
            intr,
            fire_and_forget,
            mode,
        } => {
            let config = BusConfig::load(cli.config.as_deref())?;
            let mut registry = Registry::from_config(&config)?;
            if fire_and_forget {
                registry = registry.with_delivery(Delivery::FireAndForget);
            }
            if let Some(mode) = mode {
                registry = registry.with_mode(parse_mode(&mode)?);
            }

            let mut flags = CreateFlags::empty();
            flags.set(CreateFlags::EXCL, excl);
            flags.set(CreateFlags::INTR, intr);

            let path = registry.create(name.as_deref(), flags)?;
            println!("{}", path.display());
        }
        Command::Unlink { name } => buscast::unlink(&name)?,
        Command::Broadcast {
            name,
            message,
            nowait,
        } => {
            let flags = if nowait {
                IoFlags::NOWAIT
            } else {
                IoFlags::empty()
            };
            let mut bus = BusHandle::connect(&name, OpenFlags::WRONLY)?;
            bus.write(message.as_bytes(), flags)?;
        }
        Command::Listen { name, count } => listen(name, count)?,
        Command::Wait { name } => {
            let mut bus = BusHandle::connect(&name, OpenFlags::RDONLY)?;
            bus.read(IoFlags::empty(), |message| {
                Ok::<_, io::Error>(match message {
                    None => Flow::Continue,
                    Some(_) => Flow::Stop,
                })
            })?;
        }
        Command::Chmod { mode, name } => {
            let applied = chmod(&name, parse_mode(&mode)?)?;
            println!("{:o}", applied);
        }
        Command::Chown { owner, name } => {
            let (user, group) = match owner.split_once(':') {
                Some((user, group)) => (user, Some(group)),
                None => (owner.as_str(), None),
            };
            let uid = (!user.is_empty()).then(|| resolve_user(user)).transpose()?;
            let gid = group
                .filter(|g| !g.is_empty())
                .map(resolve_group)
                .transpose()?;
            chown(&name, uid, gid)?;
        }
        Command::Chgrp { group, name } => {
            chown(&name, None, Some(resolve_group(&group)?))?;
        }
        Command::Listeners { name } => {
            let bus = BusHandle::connect(&name, OpenFlags::RDONLY)?;
            println!("{}", bus.listener_count()?);
        }
    }

    Ok(())
}

fn listen(name: PathBuf, count: Option<usize>) -> buscast::Result<()> {
    let mut bus = BusHandle::connect(&name, OpenFlags::RDONLY)?;
    let mut remaining = count;
    let mut out = io::stdout().lock();

    bus.read(IoFlags::empty(), |message| -> io::Result<Flow> {
        let Some(bytes) = message else {
            info!(bus = %name.display(), "Listening");
            return Ok(if remaining == Some(0) {
                Flow::Stop
            } else {
                Flow::Continue
            });
        };

        writeln!(out, "{}", String::from_utf8_lossy(bytes))?;
        out.flush()?;

        match remaining.as_mut() {
            Some(left) => {
                *left -= 1;
                Ok(if *left == 0 { Flow::Stop } else { Flow::Continue })
            }
            None => Ok(Flow::Continue),
        }
    })
}
