use clap::{Parser, Subcommand};
use solid_serial::config::{Config, ConfigLoader};
use solid_serial::discovery::{DetectionMode, PortDetector};
use solid_serial::port::{SerialSession, SessionOptions};
use solid_serial::{fixer, logging, AppResult};
use std::path::PathBuf;
use std::time::Duration;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "solid-serial",
    version,
    about = "Repair and probe serial ports whose USB adapters misbehave.",
    long_about = "Clears the abort-on-error flag that some USB serial drivers leave set, and opens sessions that can be torn down safely after the adapter is unplugged."
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file to use instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List candidate ports for the configured USB device.
    List {
        /// List every serial port instead of matching the USB identity.
        #[arg(long)]
        all: bool,

        /// Print JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// Clear the abort-on-error flag of a port.
    Repair {
        /// Port name, e.g. COM3 or /dev/ttyUSB0.
        port: String,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Open a session, show its line state, then tear it down.
    Probe {
        /// Port name or alias.
        port: String,

        /// Baud rate; defaults to the configured rate.
        #[arg(long)]
        baud: Option<u32>,

        /// How long to watch for line changes, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        watch_ms: u64,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    logging::init(&loader.config().logging, cli.verbose);

    if let Err(e) = run(cli.command, &loader) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
    Ok(())
}

fn run(command: Command, loader: &ConfigLoader) -> AppResult<()> {
    let config = loader.config();
    match command {
        Command::List { all, json } => list_ports(config, all, json),
        Command::Repair { port, json } => {
            let port = config.serial.resolve_port(&port);
            let report = fixer::repair(&port)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Repaired {} ({})", report.port_name, report.device_path);
                println!(
                    "  abort-on-error was {}",
                    if report.abort_on_error_was_set {
                        "set"
                    } else {
                        "clear"
                    }
                );
                println!(
                    "  attempts: read {}, write {}",
                    report.read_attempts, report.write_attempts
                );
            }
            Ok(())
        }
        Command::Probe {
            port,
            baud,
            watch_ms,
        } => probe(config, &port, baud, Duration::from_millis(watch_ms)),
        Command::Config => {
            match &loader.config_path {
                Some(path) => println!("# loaded from {}", path.display()),
                None => println!("# built-in defaults"),
            }
            print!("{}", loader.to_toml()?);
            Ok(())
        }
    }
}

fn list_ports(config: &Config, all: bool, json: bool) -> AppResult<()> {
    let mode = if all {
        DetectionMode::AllPorts
    } else {
        config.discovery.mode
    };
    let selector = config.discovery.selector();
    let mut detector = PortDetector::new(mode);
    let ports = detector.detect_candidate_ports(&selector)?;

    if json {
        let value = serde_json::json!({
            "selector": selector.pnp_id(),
            "mode": detector.mode(),
            "ports": ports,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if detector.mode() != mode {
        println!("USB identity lookup unavailable; showing all ports.");
    }
    if ports.is_empty() {
        println!("No candidate ports for {selector}");
    } else {
        for port in ports {
            println!("{port}");
        }
    }
    Ok(())
}

fn probe(config: &Config, port: &str, baud: Option<u32>, watch: Duration) -> AppResult<()> {
    let session_config = config.serial.session_config(port, baud)?;
    let options = SessionOptions {
        repair_before_open: config.serial.repair_before_open,
        ..SessionOptions::default()
    };

    println!("Opening {session_config}");
    let mut session = SerialSession::open_with(session_config, &options)?;

    let state = session.line_state()?;
    println!(
        "  CTS={} DSR={} RI={} CD={}",
        state.cts, state.dsr, state.ri, state.cd
    );

    std::thread::sleep(watch);
    if let Some(events) = session.line_events() {
        for event in events.try_iter() {
            println!("  {:?} -> {}", event.pin, event.level);
        }
    }

    let report = session.close();
    println!(
        "Closed: event loop {:?}, stream closed {}, session closed {}",
        report.event_loop, report.stream_closed, report.session_closed
    );
    for anomaly in &report.anomalies {
        println!("  note: {anomaly}");
    }
    Ok(())
}
