//! Periodic sampling loops
//!
//! Start a read, wait for its outcome, print the status line on the RTT
//! console, sleep out the rest of the sample period. One loop per strategy.

use embassy_time::{Duration, Instant, Timer};
use hygro_core::config::SamplerConfig;
use hygro_core::hal::{EdgeSource, Line, MicroClock, PulseTimer};
use hygro_core::report::format_outcome;
use hygro_core::{BlockingSensor, ErrorKind, SensorReading, SharedSensor, Status};
use log::{info, warn};
use rtt_target::rprint;

fn emit(outcome: &Result<SensorReading, ErrorKind>) {
    if let Err(e) = outcome {
        if e.is_sensor_fault() {
            warn!("DHT22 fault, check wiring and power: {}", e);
        }
    }
    rprint!("{}", format_outcome(outcome).as_str());
}

/// Poll until the in-flight read finishes.
async fn wait_outcome<L, T, E>(
    sensor: &SharedSensor<L, T, E>,
    poll_interval: Duration,
) -> Result<SensorReading, ErrorKind>
where
    L: Line,
    T: PulseTimer,
    E: EdgeSource,
{
    loop {
        match sensor.check_status() {
            Status::Pending => Timer::after(poll_interval).await,
            Status::Ready(reading) => return Ok(reading),
            Status::Failed(e) => return Err(e),
            // Nothing in flight; the start was lost
            Status::Idle => return Err(ErrorKind::NotResponding),
        }
    }
}

/// Sample forever with the interrupt-driven strategy.
pub async fn run_interrupt_driven<L, T, E>(
    sensor: &'static SharedSensor<L, T, E>,
    config: SamplerConfig,
) -> !
where
    L: Line,
    T: PulseTimer,
    E: EdgeSource,
{
    let period = Duration::from_millis(config.sample_period_ms as u64);
    let poll_interval = Duration::from_millis(config.poll_interval_ms as u64);
    info!(
        "Sampling every {} ms, interrupt-driven, polling every {} ms",
        config.sample_period_ms, config.poll_interval_ms
    );

    sensor.initialize();
    // Sensor needs a moment after power-up before it answers
    Timer::after(period).await;

    loop {
        let started = Instant::now();
        let outcome = match sensor.start_reading() {
            Ok(()) => wait_outcome(sensor, poll_interval).await,
            Err(e) => Err(e),
        };
        emit(&outcome);
        Timer::at(started + period).await;
    }
}

/// Sample forever with the busy-wait strategy.
pub async fn run_busy_wait<L, C>(mut sensor: BlockingSensor<L, C>, config: SamplerConfig) -> !
where
    L: Line,
    C: MicroClock,
{
    let period = Duration::from_millis(config.sample_period_ms as u64);
    info!("Sampling every {} ms, busy-wait", config.sample_period_ms);

    sensor.initialize();
    Timer::after(period).await;

    loop {
        let started = Instant::now();
        emit(&sensor.read());
        Timer::at(started + period).await;
    }
}
