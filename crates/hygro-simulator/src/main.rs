//! Desktop simulator for the hygro-rs DHT22 probe.
//!
//! Runs the sampling loop against a simulated sensor line in virtual time,
//! with either read strategy, and prints the same status lines the firmware
//! emits on its console. Each line is parsed back the way the desktop monitor
//! would and logged.
//!
//! ```text
//! hygro-simulator --strategy busy-wait --samples 10
//! hygro-simulator --fault flip-bit
//! hygro-simulator --fault-matrix
//! RUST_LOG=debug hygro-simulator
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};

use hygro_core::config::{MAX_ENCODED_LEN, SamplerConfig, Strategy};
use hygro_core::report::{ReportLine, format_outcome, parse_line};
use hygro_core::sim::{Fault, SimBus, SimWorld, Waveform};
use hygro_core::{BlockingSensor, ErrorKind, SensorReading, SharedSensor, Status};

/// Give up on a read after this many polls without an outcome.
const MAX_POLLS: u32 = 1000;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Interrupt,
    BusyWait,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Interrupt => Strategy::InterruptDriven,
            StrategyArg::BusyWait => Strategy::BusyWait,
        }
    }
}

/// Sensor misbehaviour to inject into every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FaultArg {
    Absent,
    StuckLow,
    LongAckLow,
    LongAckHigh,
    LongSync,
    LongData,
    FlipBit,
}

impl FaultArg {
    fn fault(self) -> Fault {
        match self {
            FaultArg::Absent => Fault::Absent,
            FaultArg::StuckLow => Fault::StuckLow,
            FaultArg::LongAckLow => Fault::StretchAckLow(160),
            FaultArg::LongAckHigh => Fault::StretchAckHigh(160),
            FaultArg::LongSync => Fault::StretchSync(17, 120),
            FaultArg::LongData => Fault::StretchData(29, 150),
            FaultArg::FlipBit => Fault::FlipBit(9),
        }
    }
}

/// DHT22 probe simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Read strategy; overrides the loaded config
    #[arg(short, long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Number of samples to take
    #[arg(short = 'n', long, default_value_t = 5)]
    samples: u32,

    /// Inject a fault into every sample
    #[arg(short, long, value_enum)]
    fault: Option<FaultArg>,

    /// Run every fault once with both strategies and exit
    #[arg(long)]
    fault_matrix: bool,

    /// Load the sampler config from a postcard file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective sampler config to a postcard file
    #[arg(long)]
    save_config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Synthetic climate
// ---------------------------------------------------------------------------

/// Slowly drifting temperature and humidity, in the sensor's tenths.
fn synthetic_reading(elapsed_secs: f64) -> SensorReading {
    let t = elapsed_secs;
    // Temperature: 20–26 °C with a slow drift
    let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();
    // Humidity: 40–60 % with a different period
    let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

    SensorReading {
        temperature: (temperature * 10.0).round().clamp(-400.0, 800.0) as i16,
        humidity: (humidity * 10.0).round().clamp(0.0, 1000.0) as u16,
    }
}

// ---------------------------------------------------------------------------
// One read per strategy
// ---------------------------------------------------------------------------

fn read_busy_wait(waveform: &Waveform) -> Result<SensorReading, ErrorKind> {
    let bus = SimBus::new(waveform);
    let mut sensor = BlockingSensor::new(&bus, &bus);
    sensor.initialize();
    let outcome = sensor.read();
    debug!("Busy-wait read took {} us of virtual time", bus.now_us());
    outcome
}

fn read_interrupt_driven(
    waveform: &Waveform,
    poll_interval_ms: u32,
) -> Result<SensorReading, ErrorKind> {
    let world = SimWorld::new(waveform);
    let shared = SharedSensor::new();
    shared.install(world.sensor());
    shared.initialize();
    shared.start_reading()?;

    let poll_us = poll_interval_ms.saturating_mul(1000);
    let mut sink = &shared;
    for _ in 0..MAX_POLLS {
        match shared.check_status() {
            Status::Pending => {
                // Interrupts keep firing until the next poll
                let next_poll = world.now() + poll_us;
                world.run_until(&mut sink, |_| world.now() >= next_poll);
                if world.now() < next_poll {
                    world.advance(next_poll - world.now());
                }
            }
            Status::Ready(reading) => {
                debug!("Interrupt-driven read done at {} us", world.now());
                return Ok(reading);
            }
            Status::Failed(e) => return Err(e),
            Status::Idle => return Err(ErrorKind::NotResponding),
        }
    }

    warn!("Read still pending after {} polls", MAX_POLLS);
    Err(ErrorKind::NotResponding)
}

fn read_once(
    strategy: Strategy,
    waveform: &Waveform,
    config: &SamplerConfig,
) -> Result<SensorReading, ErrorKind> {
    match strategy {
        Strategy::BusyWait => read_busy_wait(waveform),
        Strategy::InterruptDriven => read_interrupt_driven(waveform, config.poll_interval_ms),
    }
}

/// Print the status line and check the monitor reads it back.
fn emit(outcome: &Result<SensorReading, ErrorKind>) {
    let line = format_outcome(outcome);
    print!("{}", line);

    match parse_line(&line) {
        Ok(ReportLine::Reading(reading)) => info!(
            "monitor: {:.1} °C, {:.1} %RH",
            reading.temperature_celsius(),
            reading.humidity_percent()
        ),
        Ok(ReportLine::Error(e)) if e.is_sensor_fault() => {
            warn!("monitor: sensor error {} ({})", e.code(), e)
        }
        Ok(ReportLine::Error(e)) => info!("monitor: read skipped, error {} ({})", e.code(), e),
        Err(e) => error!("monitor could not parse {:?}: {}", line.as_str(), e),
    }
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Option<SamplerConfig> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Cannot read {}: {}", path.display(), e);
            return None;
        }
    };
    match SamplerConfig::from_bytes(&bytes) {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Invalid config in {}: {}", path.display(), e);
            None
        }
    }
}

fn save_config(path: &Path, config: &SamplerConfig) -> bool {
    let mut buf = [0u8; MAX_ENCODED_LEN];
    let bytes = match config.to_bytes(&mut buf) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Cannot encode config: {}", e);
            return false;
        }
    };
    match std::fs::write(path, bytes) {
        Ok(()) => {
            info!("Saved config to {}", path.display());
            true
        }
        Err(e) => {
            error!("Cannot write {}: {}", path.display(), e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn run_fault_matrix(config: &SamplerConfig) {
    let waveform = Waveform::from_reading(&synthetic_reading(0.0));
    for strategy in [Strategy::InterruptDriven, Strategy::BusyWait] {
        for fault in FaultArg::value_variants() {
            let outcome = read_once(strategy, &waveform.with_fault(fault.fault()), config);
            info!("{:?} / {:?}", strategy, fault);
            emit(&outcome);
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut config = match &args.config {
        Some(path) => match load_config(path) {
            Some(config) => config,
            None => return ExitCode::FAILURE,
        },
        None => SamplerConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }
    if let Err(e) = config.validate() {
        error!("Sampler config rejected: {}", e);
        return ExitCode::FAILURE;
    }
    if let Some(path) = &args.save_config {
        if !save_config(path, &config) {
            return ExitCode::FAILURE;
        }
    }

    info!("Starting hygro-rs simulator");
    if args.fault_matrix {
        run_fault_matrix(&config);
        return ExitCode::SUCCESS;
    }

    info!(
        "Strategy {:?}, {} samples every {} ms of virtual time",
        config.strategy, args.samples, config.sample_period_ms
    );

    let period_secs = config.sample_period_ms as f64 / 1000.0;
    for sample in 0..args.samples {
        let truth = synthetic_reading(sample as f64 * period_secs);
        let mut waveform = Waveform::from_reading(&truth);
        if let Some(fault) = args.fault {
            waveform = waveform.with_fault(fault.fault());
        }

        let outcome = read_once(config.strategy, &waveform, &config);
        if let Ok(reading) = outcome {
            if reading != truth {
                warn!("Decoded {:?}, sensor sent {:?}", reading, truth);
            }
        }
        emit(&outcome);
    }

    info!("Simulator exiting");
    ExitCode::SUCCESS
}
