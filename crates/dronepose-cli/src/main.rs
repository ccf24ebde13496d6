//! `dronepose` – pose observer command line.
//!
//! 1. Loads `~/.dronepose/observer.toml` (or `--config`), applies
//!    `DRONEPOSE_*` environment overrides and command-line flags.
//! 2. Starts the [`ObserverLoop`] on a Tokio runtime.
//! 3. Feeds ROS-style JSON envelope lines from `--input` (or stdin) through
//!    the [`RosBridge`].
//! 4. Writes one pose line and one transform line per tick to stdout; logs
//!    and diagnostics go to stderr.
//! 5. Stops on **Ctrl-C** or shortly after the input ends.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

use dronepose_middleware::{BusSink, EventBus, JsonLinesSink, PoseSink, RosBridge, Topic};
use dronepose_runtime::{ObserverConfig, ObserverLoop, ObserverStats, init_tracing};
use dronepose_types::{EventPayload, PoseError};

use crate::config::{CliOverrides, Config};

/// Sensor events buffered per bus topic.
const BUS_CAPACITY: usize = 4096;

/// How long runtime shutdown waits for blocking I/O threads.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Fixed-rate multi-sensor pose observer.
#[derive(Parser, Debug, Clone)]
#[command(name = "dronepose", author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: ~/.dronepose/observer.toml).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read sensor envelopes from FILE instead of stdin.
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Observer frequency in Hz.
    #[arg(long, value_name = "HZ")]
    loop_hz: Option<f64>,

    /// Positioning mode (1 = GPS, 2 = GUIDANCE).
    #[arg(long, value_name = "MODE")]
    positioning: Option<i64>,

    /// Take height from the range/altitude source instead of ultrasonic.
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,

    /// Replay input at the pace given by each envelope's `t` field.
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Write the effective configuration to the config path and exit.
    #[arg(long, default_value_t = false)]
    write_config: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            loop_hz: self.loop_hz,
            positioning: self.positioning,
            simulation: self.simulation,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::config_path)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_tracing("dronepose");

    print_banner();

    let path = args.config_path();
    let file = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            info!(path = %path.display(), "configuration loaded");
            cfg
        }
        Ok(None) => {
            info!(path = %path.display(), "no configuration file, using defaults");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => return fail(&e),
    };

    if args.write_config {
        return write_config(file, &args, &path);
    }

    let observer_config = match file.into_observer_config(&args.overrides()) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return fail(&PoseError::Config(format!("failed to start Tokio runtime: {e}"))),
    };

    let result = runtime.block_on(run(observer_config, args));
    // A stdin read still pending on a blocking thread would otherwise keep
    // the process alive until the pipe closes.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(stats) => {
            eprintln!(
                "  {} {} samples, {} poses published",
                "✓".green(),
                stats.samples,
                stats.published
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

async fn run(config: ObserverConfig, args: Args) -> Result<ObserverStats, PoseError> {
    let bus = EventBus::new(BUS_CAPACITY);
    let sinks: Vec<Arc<dyn PoseSink>> = vec![
        Arc::new(JsonLinesSink::new(tokio::io::stdout())),
        Arc::new(BusSink::new(bus.clone())),
    ];

    // ── Shutdown ──────────────────────────────────────────────────────────
    let stop_tx = Arc::new(watch::Sender::new(false));
    let ctrlc_tx = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("{}", "⚠  Ctrl-C received – stopping observer …".yellow().bold());
        ctrlc_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    tokio::spawn(print_diagnostics(bus.clone()));

    // ── Input ─────────────────────────────────────────────────────────────
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                PoseError::Config(format!("failed to open input {}: {e}", path.display()))
            })?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    observe(config, sinks, bus, reader, args.realtime, &stop_tx).await
}

/// Run the observer and feed it `reader` until the input ends or `stop`
/// is set, whichever comes first.
async fn observe<R>(
    config: ObserverConfig,
    sinks: Vec<Arc<dyn PoseSink>>,
    bus: EventBus,
    reader: R,
    realtime: bool,
    stop: &watch::Sender<bool>,
) -> Result<ObserverStats, PoseError>
where
    R: AsyncBufRead + Unpin,
{
    let period = config.period()?;
    let observer = ObserverLoop::new(config, sinks)?;
    let observer_task = tokio::spawn(observer.run(bus.clone(), stop.subscribe()));

    wait_for_observer(&bus, stop).await;
    let bridge = RosBridge::new(bus);
    match until_stopped(stop, bridge.run_reader(reader, realtime)).await {
        Some(result) => {
            match result {
                Ok(count) => info!(samples = count, "input finished"),
                Err(e) => error!(error = %e, "input aborted"),
            }
            // Let the last samples reach one more tick before stopping.
            until_stopped(stop, tokio::time::sleep(period.saturating_mul(2))).await;
        }
        None => info!("shutdown requested, remaining input left unread"),
    }
    stop.send_replace(true);

    observer_task
        .await
        .map_err(|e| PoseError::Channel(format!("observer task failed: {e}")))
}

/// Drive `work` to completion unless `stop` is set first, in which case
/// `work` is dropped and `None` returned.
async fn until_stopped<F: Future>(stop: &watch::Sender<bool>, work: F) -> Option<F::Output> {
    let mut stopped = stop.subscribe();
    tokio::select! {
        output = work => Some(output),
        _ = stopped.wait_for(|s| *s) => None,
    }
}

/// Wait until the observer has subscribed to sensor input, so no line is
/// read before anyone listens.
async fn wait_for_observer(bus: &EventBus, stop: &watch::Sender<bool>) {
    let mut stopped = stop.subscribe();
    while bus.receiver_count(Topic::Sensors) == 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            _ = stopped.wait_for(|s| *s) => return,
        }
    }
}

/// Echo diagnostics published on the bus to stderr.
async fn print_diagnostics(bus: EventBus) {
    let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);
    while let Ok(event) = diagnostics.recv().await {
        if let EventPayload::Diagnostic { component, message } = event.payload {
            eprintln!("  {} {}: {}", "!".yellow().bold(), component.bold(), message.dimmed());
        }
    }
}

fn write_config(mut cfg: Config, args: &Args, path: &PathBuf) -> ExitCode {
    let overrides = args.overrides();
    if overrides.loop_hz.is_some() {
        cfg.observer.loop_hz = overrides.loop_hz;
    }
    if let Some(mode) = overrides.positioning {
        cfg.observer.positioning = mode;
    }
    if let Some(sim) = overrides.simulation {
        cfg.observer.simulation = sim;
    }
    match config::save_to(&cfg, path) {
        Ok(()) => {
            eprintln!("  {} configuration written to {}", "✓".green(), path.display().to_string().bold());
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fail(e: &PoseError) -> ExitCode {
    error!(error = %e, "observer cannot start");
    eprintln!("{}: {}", "Error".red().bold(), e);
    ExitCode::from(2)
}

fn print_banner() {
    eprintln!();
    eprintln!("  {}", "dronepose".bold().cyan());
    eprintln!("  {}", "fixed-rate multi-sensor pose observer".dimmed());
    eprintln!();
}
