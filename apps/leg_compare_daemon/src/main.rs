use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use leg_compare::capture;
use leg_compare::{
    CaptureRing, ChannelSink, Engine, EngineHandle, MonitorConfig, Notification, OutputMask,
    StatusReporter,
};
use log::LevelFilter;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "leg_compare_daemon",
    about = "Reports whether the left and right inputs of a capture device carry the same program"
)]
struct Args {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `logging.level` from the configuration.
    #[arg(long)]
    log_level: Option<LevelFilter>,
    /// Overrides `capture.device` from the configuration.
    #[arg(long)]
    device: Option<String>,
    /// Print the available input devices and exit.
    #[arg(long)]
    list_devices: bool,
    /// Seconds between status lines in the log.
    #[arg(long, default_value_t = 10)]
    status_interval: u64,
}

/// Requests read from stdin, one per line.
enum Command {
    Mask(i32),
    Active(i32),
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match (words.next()?, words.next()) {
            ("mask", Some(value)) => Command::Mask(value.parse().ok()?),
            ("active", Some(value)) => Command::Active(value.parse().ok()?),
            ("status", None) => Command::Status,
            ("quit", None) => Command::Quit,
            _ => return None,
        };

        Some(command)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("could not load {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    if let Some(device) = args.device {
        config.capture.device = Some(device);
    }

    let level = match args.log_level {
        Some(level) => level,
        None => config
            .logging
            .level
            .parse()
            .with_context(|| format!("invalid log level '{}'", config.logging.level))?,
    };
    setup_logger(level, config.logging.file.as_deref())?;

    if args.list_devices {
        for name in capture::list_input_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let ring = Arc::new(CaptureRing::new(
        config.window_config(),
        config.capture.frames_per_callback,
    ));
    let (sink, notifications) = ChannelSink::new();
    let reporter = Arc::new(StatusReporter::new(
        Box::new(sink),
        OutputMask::try_from(config.report.mask)?,
        config.report.active,
    ));
    spawn_notification_writer(notifications)?;

    let mut engine = Engine::new(&config, Arc::clone(&ring), Arc::clone(&reporter)).spawn()?;
    let stream = match capture::start_capture(&config.capture, ring) {
        Ok(stream) => stream,
        Err(err) => {
            engine.stop();
            return Err(err).context("could not start capture");
        }
    };
    log::info!("Monitoring '{}'", stream.device_name());

    run_command_loop(
        &engine,
        &reporter,
        spawn_stdin_reader()?,
        Duration::from_secs(args.status_interval.max(1)),
    );

    drop(stream);
    engine.stop();

    Ok(())
}

fn setup_logger(level: LevelFilter, file: Option<&Path>) -> Result<()> {
    let mut builder = nih_log::LoggerBuilder::new(level);
    if cfg!(debug_assertions) {
        builder = builder.always_show_module_path();
    }

    let mut file_error = None;
    if let Some(path) = file {
        builder = match builder.with_output_target(nih_log::OutputTarget::File(path.to_owned())) {
            Ok(builder) => builder,
            Err(err) => {
                file_error = Some(err.to_string());
                err.into()
            }
        };
    }
    builder
        .build_global()
        .context("could not install the logger")?;

    if let Some(err) = file_error {
        log::warn!("{err}, logging to stderr instead");
    }

    Ok(())
}

/// Notifications are the daemon's output. They are written to stdout as JSON lines, away from
/// the comparison thread.
fn spawn_notification_writer(notifications: Receiver<Notification>) -> Result<()> {
    thread::Builder::new()
        .name("notifications".to_owned())
        .spawn(move || {
            for notification in notifications {
                match serde_json::to_string(&notification) {
                    Ok(json) => println!("{json}"),
                    Err(err) => log::error!("Could not serialize {notification:?}: {err}"),
                }
            }
        })?;

    Ok(())
}

fn spawn_stdin_reader() -> Result<Receiver<Command>> {
    let (sender, receiver) = channel::unbounded();
    thread::Builder::new()
        .name("stdin".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }

                match Command::parse(&line) {
                    Some(command) => {
                        if sender.send(command).is_err() {
                            break;
                        }
                    }
                    None => log::warn!("Unknown command '{}'", line.trim()),
                }
            }
        })?;

    Ok(receiver)
}

fn run_command_loop(
    engine: &EngineHandle,
    reporter: &StatusReporter,
    commands: Receiver<Command>,
    status_interval: Duration,
) {
    // Without stdin the daemon keeps running until it is killed
    let mut commands = Some(commands);
    loop {
        let Some(receiver) = &commands else {
            thread::sleep(status_interval);
            log_status(engine, reporter);
            continue;
        };

        match receiver.recv_timeout(status_interval) {
            Ok(Command::Mask(value)) => {
                if let Err(err) = reporter.set_mask(value) {
                    log::warn!("{err}");
                }
            }
            Ok(Command::Active(value)) => {
                if let Err(err) = reporter.set_active(value) {
                    log::warn!("{err}");
                }
            }
            Ok(Command::Status) | Err(RecvTimeoutError::Timeout) => log_status(engine, reporter),
            Ok(Command::Quit) => break,
            Err(RecvTimeoutError::Disconnected) => commands = None,
        }

        if !engine.is_running() {
            log::error!("Comparison loop exited unexpectedly");
            break;
        }
    }
}

fn log_status(engine: &EngineHandle, reporter: &StatusReporter) {
    let status = serde_json::json!({
        "report": reporter.snapshot(),
        "engine": engine.stats(),
    });
    log::info!("Status {status}");
}
