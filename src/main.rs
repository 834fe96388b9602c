use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use grblstream::{
    init_logging, list_ports, parse_assignment, read_program, streamer_config, CommandStreamer,
    CommunicatorListener, Config, Connection, GcodeCommand, GrblFirmwareSettings,
    SerialConnection,
};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long to wait for the controller banner after opening the port
const STARTUP_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "grblstream",
    version,
    about = "Stream G-code to GRBL controllers and manage firmware settings"
)]
struct Cli {
    /// Serial port (overrides the configuration file)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Configuration file (.toml or .json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `grblstream_communication=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like CNC controllers
    Ports,
    /// Stream a G-code file
    Stream(StreamArgs),
    /// Print the controller's settings, optionally writing some first
    Settings(SettingsArgs),
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// G-code file to send
    file: PathBuf,

    /// Wait for each command to be acknowledged before sending the next
    #[arg(long)]
    single_step: bool,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// Setting to write, e.g. `--set 21=1` or `--set '$130=250.5'`
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    assignments: Vec<(String, String)>,
}

/// Streamer events the command loop waits on
enum Progress {
    Banner,
    Complete(GcodeCommand),
    Skipped(GcodeCommand),
    PausedOnError,
    Closed,
}

/// Forwards streamer events to the command loop and prints console errors
struct ProgressListener {
    tx: Sender<Progress>,
}

impl ProgressListener {
    fn channel() -> (Arc<Self>, Receiver<Progress>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, progress: Progress) {
        let _ = self.tx.send(progress);
    }
}

impl CommunicatorListener for ProgressListener {
    fn on_raw_response(&self, response: &str) {
        if response.starts_with("Grbl ") {
            self.send(Progress::Banner);
        }
    }

    fn on_command_complete(&self, command: &GcodeCommand) {
        self.send(Progress::Complete(command.clone()));
    }

    fn on_command_skipped(&self, command: &GcodeCommand) {
        self.send(Progress::Skipped(command.clone()));
    }

    fn on_console_error(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn on_paused_on_error(&self) {
        self.send(Progress::PausedOnError);
    }

    fn on_connection_closed(&self) {
        self.send(Progress::Closed);
    }
}

/// Connection parameters resolved from the command line and config file
struct Target {
    port: String,
    baud_rate: u32,
    timeout: Duration,
}

impl Target {
    fn resolve(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        let port = match cli.port.as_deref().or(config.port()) {
            Some(port) => port.to_string(),
            None => bail!("no serial port given; pass --port or set connection.port"),
        };

        Ok(Self {
            port,
            baud_rate: cli.baud.unwrap_or(config.connection.baud_rate),
            timeout: Duration::from_millis(config.connection.timeout_ms),
        })
    }
}

/// Wait briefly for the controller to announce itself after a reset
fn wait_for_banner(rx: &Receiver<Progress>) {
    let deadline = Instant::now() + STARTUP_WAIT;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(Progress::Banner) => return,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    debug!("No controller banner seen");
}

fn run_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No candidate serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.port_name, port.description);
    }
    Ok(())
}

fn run_stream(target: &Target, config: &Config, args: &StreamArgs) -> anyhow::Result<()> {
    let program = read_program(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;

    let connection: Arc<dyn Connection> = Arc::new(SerialConnection::new());
    let streamer = CommandStreamer::with_config(connection, streamer_config(config));
    streamer.set_single_step_mode(args.single_step || config.streaming.single_step);

    let (listener, rx) = ProgressListener::channel();
    streamer.add_listener(listener);
    streamer.open_port(&target.port, target.baud_rate)?;
    wait_for_banner(&rx);

    info!("Streaming {} commands to {}", program.len(), target.port);
    let total = program.len();
    for line in program {
        streamer.enqueue(line);
    }

    let mut done = 0;
    let mut failed = 0;
    while done < total {
        match rx.recv_timeout(target.timeout) {
            Ok(Progress::Complete(command)) => {
                done += 1;
                if command.is_error() {
                    failed += 1;
                }
                debug!("{}/{} {}", done, total, command);
            }
            Ok(Progress::Skipped(_)) => {
                done += 1;
                failed += 1;
            }
            Ok(Progress::PausedOnError) => {
                streamer.close_port()?;
                bail!("streaming paused on error after {} of {} commands", done, total);
            }
            Ok(Progress::Closed) => bail!("connection closed"),
            Ok(Progress::Banner) => {}
            Err(RecvTimeoutError::Timeout) => {
                if streamer.active_count() > 0 {
                    bail!(
                        "no acknowledgement within {} ms",
                        target.timeout.as_millis()
                    );
                }
            }
            Err(RecvTimeoutError::Disconnected) => bail!("streamer stopped"),
        }
    }

    streamer.close_port()?;
    println!("Sent {} commands, {} failed", total, failed);
    Ok(())
}

fn run_settings(target: &Target, config: &Config, args: &SettingsArgs) -> anyhow::Result<()> {
    let connection: Arc<dyn Connection> = Arc::new(SerialConnection::new());
    let store = GrblFirmwareSettings::with_config(
        connection,
        streamer_config(config),
        config.write_timeout(),
    );

    let (listener, rx) = ProgressListener::channel();
    store.streamer().add_listener(listener);
    store.streamer().open_port(&target.port, target.baud_rate)?;
    wait_for_banner(&rx);

    store.refresh();
    let deadline = Instant::now() + target.timeout;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            bail!("controller did not finish reporting settings");
        };
        match rx.recv_timeout(remaining) {
            Ok(Progress::Complete(command)) if command.trimmed() == "$$" => break,
            Ok(Progress::Closed) => bail!("connection closed"),
            Ok(_) => continue,
            Err(_) => bail!("controller did not finish reporting settings"),
        }
    }

    for (key, value) in &args.assignments {
        let updated = store
            .set_value(key, value)
            .with_context(|| format!("writing {}={}", key, value))?;
        info!("Updated {}", updated);
    }

    for setting in store.get_all_settings() {
        println!("{}", setting);
    }

    store.streamer().close_port()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    let config = Config::load_or_default(cli.config.as_deref())?;
    debug!("Using configuration {:?}", config);

    match &cli.command {
        Command::Ports => run_ports(),
        Command::Stream(args) => run_stream(&Target::resolve(&cli, &config)?, &config, args),
        Command::Settings(args) => run_settings(&Target::resolve(&cli, &config)?, &config, args),
    }
}
