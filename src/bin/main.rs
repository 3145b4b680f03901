#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

extern crate alloc;

use embassy_executor::Spawner;
use embassy_net::Stack;
use embassy_time::{Duration as EmbassyDuration, Instant, Timer, WithTimeout};
use embedded_hal_bus::spi::ExclusiveDevice;
use epd_ssd1677::{Config as EpdConfig, FrameBuffer, Ssd1677};
use esp_hal::{
    clock::CpuClock,
    delay::Delay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    rtc_cntl::{reset_reason, wakeup_cause},
    spi::{
        Mode,
        master::{Config as SpiConfig, Spi},
    },
    system::Cpu,
    time::Rate,
    timer::timg::TimerGroup,
};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use log::{LevelFilter, debug, info, warn};
use static_cell::{ConstStaticCell, StaticCell};
use webink_core::{
    ControllerEvent, TickResult, UpdateState, WebInkConfig, WebInkController,
    controller::TICK_INTERVAL_MS,
};
use webink_hal_esp32s3::{
    host::BoardHost,
    input::button::{ButtonConfig, OverrideButton},
    network::{
        ConnectivityHandle, WifiConfig,
        bridge::{ChannelTransport, NetBridge},
    },
    platform::display::EpdPanel,
    storage::rtc_state::{RtcStateStore, boot_kind_from_reset},
};

#[path = "main/net_worker.rs"]
mod net_worker;
#[path = "main/power.rs"]
mod power;

const DISPLAY_SPI_HZ: u32 = 10_000_000;
const WIFI_RETRY_BACKOFF_MIN_SECS: u64 = 2;
const WIFI_RETRY_BACKOFF_MAX_SECS: u64 = 120;
const NETWORK_POLL_INTERVAL_MS: u64 = 500;
const DHCP_TIMEOUT_SECS: u64 = 15;

const WIFI_SSID: &str = env!(
    "WEBINK_WIFI_SSID",
    "Set WEBINK_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "WEBINK_WIFI_PASSWORD",
    "Set WEBINK_WIFI_PASSWORD in your environment before building/flashing."
);
const WIFI_CONFIG: WifiConfig = WifiConfig::new(WIFI_SSID, WIFI_PASSWORD);

static CONNECTIVITY: ConnectivityHandle = ConnectivityHandle::new();
static NET_BRIDGE: NetBridge = NetBridge::new();
static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();
static FRAME: ConstStaticCell<FrameBuffer> = ConstStaticCell::new(FrameBuffer::new());

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Server settings from the build environment; rejected values keep their defaults.
fn build_config() -> WebInkConfig {
    let mut config = WebInkConfig::new();

    if let Some(url) = option_env!("WEBINK_SERVER_URL") {
        if let Err(err) = config.set_server_url(url) {
            warn!("config: WEBINK_SERVER_URL ignored: {}", err);
        }
    }
    if let Some(id) = option_env!("WEBINK_DEVICE_ID") {
        if let Err(err) = config.set_device_id(id) {
            warn!("config: WEBINK_DEVICE_ID ignored: {}", err);
        }
    }
    if let Some(key) = option_env!("WEBINK_API_KEY") {
        config.set_api_key(key);
    }
    if let Some(mode) = option_env!("WEBINK_DISPLAY_MODE") {
        if let Err(err) = config.set_display_mode(mode) {
            warn!("config: WEBINK_DISPLAY_MODE ignored: {}", err);
        }
    }
    if let Some(port) = option_env!("WEBINK_SOCKET_PORT") {
        match port.parse::<u16>() {
            Ok(port) => config.set_socket_port(port),
            Err(_) => warn!("config: WEBINK_SOCKET_PORT ignored: {}", port),
        }
    }

    if let Err(err) = config.validate() {
        warn!("config: {}; falling back to defaults", err);
        config.reset_to_defaults();
    }
    config
}

async fn halt(reason: &str) -> ! {
    warn!("boot: {}; halting", reason);
    loop {
        Timer::after_secs(1).await;
    }
}

fn wifi_retry_backoff_secs(consecutive_failures: u32) -> u64 {
    // 2, 4, 8, 16, 32, 64, 120, 120, ...
    let shift = consecutive_failures.min(6);
    WIFI_RETRY_BACKOFF_MIN_SECS
        .saturating_mul(1u64 << shift)
        .min(WIFI_RETRY_BACKOFF_MAX_SECS)
}

async fn wait_before_wifi_retry(consecutive_failures: &mut u32) {
    let delay_secs = wifi_retry_backoff_secs(*consecutive_failures);
    *consecutive_failures = consecutive_failures.saturating_add(1);
    info!(
        "wifi retrying in {}s (consecutive_failures={})",
        delay_secs, *consecutive_failures
    );
    Timer::after_secs(delay_secs).await;
}

fn publish_link(stack: Stack<'_>, connectivity: &ConnectivityHandle) -> bool {
    let ipv4 = stack.config_v4().map(|config| config.address.address());
    let link_up = stack.is_link_up();
    connectivity.update_link(link_up, ipv4);
    link_up && ipv4.is_some()
}

async fn wifi_connection_loop(
    wifi_controller: &mut WifiController<'_>,
    stack: Stack<'_>,
    connectivity: &'static ConnectivityHandle,
) -> ! {
    let mut consecutive_failures = 0u32;

    loop {
        connectivity.mark_connecting();

        if !wifi_controller.is_started().unwrap_or(false) {
            if let Err(err) = wifi_controller.start_async().await {
                info!("wifi start failed: {:?}", err);
                connectivity.mark_disconnected();
                wait_before_wifi_retry(&mut consecutive_failures).await;
                continue;
            }
        }

        if let Err(err) = wifi_controller.connect_async().await {
            info!("wifi connect failed: {:?}", err);
            connectivity.mark_disconnected();
            let _ = wifi_controller.disconnect_async().await;
            wait_before_wifi_retry(&mut consecutive_failures).await;
            continue;
        }

        match stack
            .wait_config_up()
            .with_timeout(EmbassyDuration::from_secs(DHCP_TIMEOUT_SECS))
            .await
        {
            Ok(()) => {
                publish_link(stack, connectivity);
                info!(
                    "wifi connected, ip={:?}",
                    connectivity.snapshot().ipv4
                );
            }
            Err(_) => {
                info!("dhcp timeout; forcing reconnect");
                connectivity.update_link(stack.is_link_up(), None);
                let _ = wifi_controller.disconnect_async().await;
                wait_before_wifi_retry(&mut consecutive_failures).await;
                continue;
            }
        }

        consecutive_failures = 0;

        loop {
            let online = publish_link(stack, connectivity);
            let is_connected = matches!(wifi_controller.is_connected(), Ok(true));

            if !(online && is_connected) {
                info!(
                    "wifi state lost (online={} connected={}); reconnecting",
                    online, is_connected
                );
                break;
            }

            Timer::after_millis(NETWORK_POLL_INTERVAL_MS).await;
        }

        connectivity.mark_disconnected();
        let _ = wifi_controller.disconnect_async().await;
        wait_before_wifi_retry(&mut consecutive_failures).await;
    }
}

fn log_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::StateChanged { from, to } => {
            debug!("webink: event state {} -> {}", from.as_str(), to.as_str());
        }
        ControllerEvent::Progress { percent, status } => info!("webink: {}% {}", percent, status),
        ControllerEvent::Error { kind, detail } => {
            warn!("webink: {} error: {}", kind.as_str(), detail);
        }
        ControllerEvent::Log(message) => info!("webink: {}", message),
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: webink starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let boot_reset_reason = reset_reason(Cpu::ProCpu);
    let boot_kind = boot_kind_from_reset(boot_reset_reason);
    info!(
        "boot reset_reason={:?} wakeup_cause={:?} kind={:?}",
        boot_reset_reason,
        wakeup_cause(),
        boot_kind
    );

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let Some(mut store) = RtcStateStore::take() else {
        halt("rtc state store unavailable").await
    };
    let state = store.restore(boot_kind);

    // Panel wiring: SCK=GPIO12 MOSI=GPIO11 CS=GPIO10 DC=GPIO9 RST=GPIO8 BUSY=GPIO7
    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_hz(DISPLAY_SPI_HZ))
            .with_mode(Mode::_0),
    )
    .unwrap()
    .with_sck(peripherals.GPIO12)
    .with_mosi(peripherals.GPIO11);
    let cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let spi_device = ExclusiveDevice::new_no_delay(spi, cs).unwrap();
    let dc = Output::new(peripherals.GPIO9, Level::Low, OutputConfig::default());
    let rst = Output::new(peripherals.GPIO8, Level::High, OutputConfig::default());
    let busy = Input::new(peripherals.GPIO7, InputConfig::default().with_pull(Pull::None));

    let driver = Ssd1677::new(spi_device, dc, rst, busy, EpdConfig::default());
    let panel = EpdPanel::new(driver, FRAME.take(), Delay::new());

    // Sleep override / manual update button, also the RTC wake pin.
    let button_pin = Input::new(peripherals.GPIO4, InputConfig::default().with_pull(Pull::Up));
    let Ok(button) = OverrideButton::new(button_pin, ButtonConfig::default());
    let host = BoardHost::new(&CONNECTIVITY, button);

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            info!("esp-radio init failed: {:?}", err);
            halt("no radio").await
        }
    };

    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                info!("wifi peripheral init failed: {:?}", err);
                halt("no wifi").await
            }
        };

    let client_config = ClientConfig::default()
        .with_ssid(WIFI_CONFIG.ssid.into())
        .with_password(WIFI_CONFIG.password.into());
    let wifi_mode = ModeConfig::Client(client_config);
    if let Err(err) = wifi_controller.set_config(&wifi_mode) {
        info!("wifi mode config failed: {:?}", err);
        halt("wifi not configurable").await
    }

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        0x3EB1_6C07_A5D4_91F2,
    );

    let mut controller = WebInkController::new(
        build_config(),
        state,
        ChannelTransport::new(&NET_BRIDGE),
        panel,
        host,
    );

    info!("Panel pins: SCK=GPIO12 MOSI=GPIO11 CS=GPIO10 DC=GPIO9 RST=GPIO8 BUSY=GPIO7");
    info!("Override button: GPIO4 (active low, wakes from deep sleep)");

    CONNECTIVITY.mark_connecting();

    let net_future = net_runner.run();
    let wifi_future = wifi_connection_loop(&mut wifi_controller, stack, &CONNECTIVITY);
    let worker_future = net_worker::run(stack, &NET_BRIDGE);
    let controller_future = async {
        if let Err(err) = controller.setup(Instant::now().as_millis()) {
            warn!("webink: setup failed: {}", err);
        }

        loop {
            let now_ms = Instant::now().as_millis();

            let host = controller.host_mut();
            host.poll_button();
            if host.take_manual_request() && !controller.trigger_manual_update(now_ms) {
                info!("webink: manual update ignored, cycle already running");
            }

            let result = controller.tick(now_ms);
            while let Some(event) = controller.next_event() {
                log_event(&event);
                if let ControllerEvent::StateChanged {
                    to: UpdateState::Complete,
                    ..
                } = event
                {
                    info!("{}", controller.status_string());
                    info!("{}", controller.network().statistics_summary());
                }
            }

            if let TickResult::DeepSleep { duration_ms } = result {
                let snapshot = controller.state().clone();
                power::enter_deep_sleep(
                    &mut store,
                    &snapshot,
                    || controller.panel_mut().sleep(),
                    duration_ms,
                );
            }

            Timer::after_millis(TICK_INTERVAL_MS).await;
        }
    };

    let _ = embassy_futures::join::join4(net_future, wifi_future, worker_future, controller_future)
        .await;
    unreachable!()
}
