mod cli;
mod config_watcher;
mod coordinator;
mod daemon;
mod device;
mod device_thread;
mod engine;
mod kwin;
mod mixer;
mod mpris;
mod notifier;
mod picker;
mod pulse;
mod tray;
mod volume;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "knobd", about = "PowerMate knob daemon for per-application volume")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon (for systemd or manual start)
    Daemon {
        /// Log level (trace, debug, info, warn, error)
        #[arg(long, env = "KNOBD_LOG_LEVEL", default_value = "info")]
        log_level: String,
    },
    /// List input devices and mark the configured knob
    Devices,
    /// List audio streams and the application each belongs to
    Apps,
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective config as TOML
    Show,
    /// Print config directory path
    Dir,
    /// Write the default config if none exists
    Init,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        None => {
            use clap::CommandFactory;
            let _ = Cli::command().print_help();
            println!();
            std::process::exit(0);
        }
        // The daemon builds its own multi-thread runtime. CLI commands need
        // at most one PulseAudio round trip.
        Some(Commands::Daemon { log_level }) => daemon::run(&log_level),
        Some(cmd) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(cli::run(cmd))),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
