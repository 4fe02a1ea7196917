//! Swarmit controller CLI.
//!
//! Usage (serial):
//!   swarmit --port /dev/ttyACM0 status
//!   swarmit --port /dev/ttyACM0 start
//!   swarmit --port /dev/ttyACM0 flash firmware.bin --start
//!
//! Usage (broker):
//!   swarmit --broker-host argus.paris.inria.fr status

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarmit::config::{AdapterKind, FileSettings, Settings};
use swarmit::controller::Controller;
use swarmit::transport::{BrokerAdapter, GatewayAdapter, SerialAdapter};

#[derive(Parser)]
#[command(name = "swarmit")]
#[command(version, about = "Controller for a fleet of swarm devices")]
struct Cli {
    /// Serial port to use when talking directly to the gateway.
    #[arg(short, long)]
    port: Option<String>,

    /// MQTT broker host; presence selects the broker adapter over serial.
    #[arg(long)]
    broker_host: Option<String>,

    /// MQTT broker port.
    #[arg(long)]
    broker_port: Option<u16>,

    /// Use TLS for the broker connection.
    #[arg(long)]
    tls: bool,

    /// Opaque 16-bit network identifier scoping the broker adapter's topics.
    #[arg(long)]
    network_id: Option<u16>,

    /// Restrict the fleet to these addresses (decimal or 0x-hex), repeatable.
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// Path to a settings file. Defaults to ./swarmit.toml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the fleet and print each device's status.
    Status,

    /// Start the application on every ready device.
    Start,

    /// Stop the application on every running device.
    Stop,

    /// Reset devices to a declared position.
    Reset {
        #[arg(long, allow_hyphen_values = true)]
        x: i32,
        #[arg(long, allow_hyphen_values = true)]
        y: i32,
    },

    /// Send a free-form text message to running devices.
    Message { text: String },

    /// Flash a firmware image over the air.
    Flash {
        firmware: PathBuf,
        /// Start the firmware once the transfer completes.
        #[arg(short, long)]
        start: bool,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Stream inbound GPIO/log events until interrupted.
    Monitor,

    /// List serial ports available on this host.
    ListPorts,
}

fn build_adapter(settings: &Settings) -> Box<dyn GatewayAdapter> {
    match settings.adapter {
        AdapterKind::Serial => Box::new(SerialAdapter::new(&settings.serial_port, settings.serial_baudrate)),
        AdapterKind::Broker => Box::new(BrokerAdapter::new(
            &settings.broker_host,
            settings.broker_port,
            settings.use_tls,
            settings.network_id,
        )),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if matches!(cli.command, Commands::ListPorts) {
        let ports = SerialAdapter::list_ports()?;
        if ports.is_empty() {
            println!("No serial ports found");
        } else {
            for port in ports {
                println!("{port}");
            }
        }
        return Ok(());
    }

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("swarmit.toml"));
    let file_settings = FileSettings::load(&config_path)?;
    let settings = Settings::resolve(
        file_settings,
        cli.port,
        cli.broker_host,
        cli.broker_port,
        cli.tls,
        cli.network_id,
        cli.devices,
        None,
        None,
    )?;

    let adapter = build_adapter(&settings);
    let controller = Controller::start(adapter, settings.allow_list.clone())?;

    match cli.command {
        Commands::Status => {
            let statuses = controller.engine().status();
            if statuses.is_empty() {
                println!("No devices found.");
            } else {
                let mut addrs: Vec<_> = statuses.keys().copied().collect();
                addrs.sort();
                println!("{:<20} {}", "ADDRESS", "STATUS");
                for addr in addrs {
                    println!("{addr:#018x} {:?}", statuses[&addr]);
                }
            }
        }
        Commands::Start => {
            let running = controller.engine().start();
            println!("Running: {}", running.len());
        }
        Commands::Stop => {
            let ready = controller.engine().stop();
            println!("Stopped (now ready): {}", ready.len());
        }
        Commands::Reset { x, y } => {
            controller.engine().reset(x, y);
            println!("Reset sent.");
        }
        Commands::Message { text } => {
            controller.engine().message(text.as_bytes());
            println!("Message sent.");
        }
        Commands::Flash { firmware, start, yes } => {
            let bytes = std::fs::read(&firmware)?;
            let (_, fw_hash) = swarmit::ota::chunk_firmware(&bytes);
            println!("Image size: {}B", bytes.len());
            println!("Image hash: {}", hex::encode(fw_hash));
            if !yes {
                print!("Continue? [Y/n] ");
                use std::io::Write;
                std::io::stdout().flush().ok();
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer).ok();
                if answer.trim().eq_ignore_ascii_case("n") {
                    println!("Aborted.");
                    controller.terminate();
                    return Ok(());
                }
            }
            let outcome = controller.flash(&bytes, settings.chunk_timeout, settings.chunk_retries)?;
            println!("Succeeded: {}, failed: {}", outcome.succeeded.len(), outcome.failed.len());
            if !outcome.failed.is_empty() {
                println!("Failed devices: {:?}", outcome.failed);
            }
            if start && outcome.failed.is_empty() {
                let running = controller.engine().start();
                println!("Started: {}", running.len());
            }
        }
        Commands::Monitor => {
            println!("Monitoring... press Ctrl-C to stop.");
            let running = Arc::new(AtomicBool::new(true));
            let handler_flag = running.clone();
            ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        Commands::ListPorts => unreachable!(),
    }

    controller.terminate();
    Ok(())
}
