#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::StackResources;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Pull};
use esp_hal::rng::Rng;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::timer::timg::TimerGroup;
use esp_mbedtls::Tls;
use esp_radio::Controller;
use esp_storage::FlashStorage;
use log::{error, info, warn};
use otagate_core::connectivity::LinkState;
use otagate_core::efuse::Provisioner;
use otagate_core::ota::OtaEngine;
use otagate_firmware::config;
use otagate_firmware::flash_efuse;
use otagate_firmware::https::MbedtlsTransport;
use otagate_firmware::network::{self, net_task, wifi_task};
use otagate_firmware::ota_slot::OtaSlotSink;
use otagate_firmware::ports::EspOtaPorts;
use otagate_firmware::security::log_security_state;
use otagate_firmware::time_sync::sntp_task;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

/// Provision the identity (with `program-efuse`) and log what the fuses hold.
fn provision_identity(flash: &mut FlashStorage<'static>) {
    let efuse = match flash_efuse::open(flash) {
        Ok(efuse) => efuse,
        Err(e) => {
            error!("eFuse store unavailable: {}", e);
            return;
        }
    };
    let mut provisioner = Provisioner::new(efuse);

    #[cfg(feature = "program-efuse")]
    {
        use config::demo_identity;
        match provisioner.program(
            demo_identity::SERIAL,
            demo_identity::HW_REV,
            demo_identity::FEATURE_FLAGS,
        ) {
            Ok(outcome) => info!("eFuse programming: {:?}", outcome),
            Err(e) => error!("eFuse programming failed: {}", e),
        }
    }

    if let Err(e) = provisioner.report() {
        error!("Reading eFuse fields failed: {}", e);
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("otagate starting");

    let mut flash = FlashStorage::new(peripherals.FLASH);
    provision_identity(&mut flash);

    let mut sink = OtaSlotSink::new(flash);
    sink.confirm_running_image();

    log_security_state();

    let ota_config = config::ota_config();
    if let Err(e) = ota_config.validate() {
        error!("Invalid OTA configuration: {}", e);
    }

    let rtc = &*mk_static!(Rtc<'static>, Rtc::new(peripherals.LPWR));
    // GPIO0 is config::BUTTON_GPIO
    let button = Input::new(
        peripherals.GPIO0,
        InputConfig::default().with_pull(Pull::Up),
    );

    let radio = &*mk_static!(
        Controller<'static>,
        esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller")
    );
    let (controller, interfaces) = esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
        .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        mk_static!(StackResources<4>, StackResources::<4>::new()),
        seed,
    );

    spawner.must_spawn(net_task(runner));
    spawner.must_spawn(wifi_task(controller, stack));

    match network::wait_for_link().await {
        LinkState::Connected => {
            info!("Wi-Fi connected");
            spawner.must_spawn(sntp_task(stack, rtc));
        }
        LinkState::Failed => warn!("Wi-Fi failed, OTA checks will be gated off"),
        _ => spawner.must_spawn(sntp_task(stack, rtc)),
    }

    let tls = Tls::new(peripherals.SHA)
        .expect("Failed to initialize TLS engine")
        .with_hardware_rsa(peripherals.RSA);

    let ports = EspOtaPorts::new(
        button,
        rtc,
        stack,
        config::UTC_OFFSET_HOURS,
        config::BATT_FAKE_MV,
    );
    let transport = MbedtlsTransport::new(stack, tls);

    let mut engine = OtaEngine::new(ota_config, ports, transport, sink, embassy_time::Delay);
    engine.run().await
}
