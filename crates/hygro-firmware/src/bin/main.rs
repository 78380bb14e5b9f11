#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Pull};
use esp_hal::timer::timg::TimerGroup;
use hygro_core::config::{SamplerConfig, Strategy};
use hygro_firmware::dual_mode_pin::DualModePin;
use hygro_firmware::sampler;
use log::error;
use rtt_target::rprintln;

#[cfg(not(feature = "busy-wait"))]
use {
    esp_hal::gpio::Io,
    esp_hal::handler,
    esp_hal::timer::PeriodicTimer,
    hygro_core::{InterruptSensor, SharedSensor},
    hygro_firmware::hw::{DhtEdges, DhtTimer},
};

#[cfg(feature = "busy-wait")]
use {hygro_core::BlockingSensor, hygro_firmware::hw::EspClock};

/// GPIO the DHT22 data line is wired to. Keep in sync with the pin taken
/// from `peripherals` below.
const DHT_GPIO: u8 = 4;

type DhtLine = DualModePin<DHT_GPIO>;

#[cfg(not(feature = "busy-wait"))]
static DHT: SharedSensor<DhtLine, DhtTimer, DhtEdges> = SharedSensor::new();

#[cfg(not(feature = "busy-wait"))]
#[handler]
fn dht_timer_isr() {
    DHT.on_timer_compare();
}

#[cfg(not(feature = "busy-wait"))]
#[handler]
fn dht_edge_isr() {
    DHT.on_edge();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    rprintln!("hygro-rs DHT22 probe starting");

    let strategy = if cfg!(feature = "busy-wait") {
        Strategy::BusyWait
    } else {
        Strategy::InterruptDriven
    };
    let config = SamplerConfig {
        strategy,
        ..SamplerConfig::default()
    };
    if let Err(e) = config.validate() {
        error!("Sampler config rejected: {}", e);
    }

    // Pad setup: input buffer, pull-up and (for the interrupt strategy) the
    // edge interrupt stay with esp-hal; the output driver is toggled by hand.
    let pad = Input::new(peripherals.GPIO4, InputConfig::default().with_pull(Pull::Up));
    let line = DhtLine::new();
    line.route_output();

    #[cfg(not(feature = "busy-wait"))]
    {
        let mut io = Io::new(peripherals.IO_MUX);
        io.set_interrupt_handler(dht_edge_isr);

        let timg1 = TimerGroup::new(peripherals.TIMG1);
        let mut timer = PeriodicTimer::new(timg1.timer0);
        timer.set_interrupt_handler(dht_timer_isr);

        DHT.install(InterruptSensor::new(
            line,
            DhtTimer::new(timer),
            DhtEdges::new(pad),
        ));
        sampler::run_interrupt_driven(&DHT, config).await
    }

    #[cfg(feature = "busy-wait")]
    {
        let _pad = pad;
        sampler::run_busy_wait(BlockingSensor::new(line, EspClock), config).await
    }
}
