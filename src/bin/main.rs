#![no_std]
#![no_main]

use core::cell::RefCell;
use core::fmt::Write as _;

use critical_section::Mutex as CsMutex;
use defmt::{info, warn, Debug2Format};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{Config as NetConfig, IpAddress, Runner, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Event, Input, InputConfig, Io, Level, Output, OutputConfig, Pull};
use esp_hal::handler;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::interrupt::Priority;
use esp_hal::rng::Rng;
use esp_hal::time::Duration as HalDuration;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::timer::Timer as _;
use esp_radio::wifi::{sta_state, ClientConfig, ModeConfig, WifiController, WifiStaState};
use panic_rtt_target as _;
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig as MqttConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::utils::rng_generator::CountingRng;
use static_cell::StaticCell;

use dimmer_node::arbiter::{ControlMode, ModeArbiter};
use dimmer_node::clock::{self, WallClock, SNTP_PACKET_LEN};
use dimmer_node::config::{
    DEVICE_ID, FIRMWARE_VERSION, HEARTBEAT_PERIOD_MS, MQTT_BROKER_HOST, MQTT_BROKER_PORT,
    MQTT_RECONNECT_INTERVAL_MS, MQTT_TOPIC_HEARTBEAT, MQTT_TOPIC_SET_PLAN, MQTT_TOPIC_SET_STATIC,
    NTP_SERVERS, NUM_CHANNELS, SNTP_RESYNC_INTERVAL_S, TRIAC_PULSE_US, UDP_PORT, WIFI_PASSWORD,
    WIFI_SSID,
};
use dimmer_node::engine::{Engine, TimerCmd, WatchdogEvent};
use dimmer_node::fastpkt;
use dimmer_node::messages::{self, Heartbeat, PlanError};
use dimmer_node::schedule::SchedulePlayer;
use dimmer_node::LevelFrame;

extern crate alloc;
use alloc::string::ToString;

esp_bootloader_esp_idf::esp_app_desc!();

/// One-shot hardware timer driving the gate pulses.
type FireTimer = esp_hal::timer::timg::Timer<'static>;

/// Status report cadence, matching the serial report of earlier firmware.
const STATUS_REPORT_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// ISR-shared state
// ---------------------------------------------------------------------------
// The engine and its hardware handles are touched from the zero-cross ISR,
// the timer ISR, and the cooperative loop. critical-section is the brief
// interrupts-off window the multi-word snapshots need.

static ENGINE: CsMutex<RefCell<Engine>> = CsMutex::new(RefCell::new(Engine::new()));
static GATE_PINS: CsMutex<RefCell<Option<[Output<'static>; NUM_CHANNELS]>>> =
    CsMutex::new(RefCell::new(None));
static ZERO_CROSS_IN: CsMutex<RefCell<Option<Input<'static>>>> = CsMutex::new(RefCell::new(None));
static FIRE_TIMER: CsMutex<RefCell<Option<FireTimer>>> = CsMutex::new(RefCell::new(None));

// ---------------------------------------------------------------------------
// Cooperative shared state
// ---------------------------------------------------------------------------

static ARBITER: Mutex<CriticalSectionRawMutex, ModeArbiter> = Mutex::new(ModeArbiter::new());
static SCHEDULE: Mutex<CriticalSectionRawMutex, SchedulePlayer> = Mutex::new(SchedulePlayer::new());
static CLOCK: Mutex<CriticalSectionRawMutex, WallClock> = Mutex::new(WallClock::new());

fn now_us() -> u64 {
    Instant::now().as_micros()
}

fn boot_ms() -> u64 {
    Instant::now().as_millis()
}

/// Push a mapped level frame into the engine, atomically w.r.t. the ISRs.
fn engine_apply(levels: LevelFrame) {
    critical_section::with(|cs| {
        let mut engine = ENGINE.borrow_ref_mut(cs);
        for (channel, level) in levels.iter().enumerate() {
            engine.set_channel_level(channel, *level);
        }
    });
}

/// Execute an engine timer command on the one-shot hardware timer.
fn exec_timer_cmd(cs: critical_section::CriticalSection<'_>, cmd: TimerCmd) {
    if let Some(timer) = FIRE_TIMER.borrow_ref_mut(cs).as_mut() {
        match cmd {
            TimerCmd::Arm { delta_us } => {
                timer.stop();
                let _ = timer.load_value(HalDuration::from_micros(delta_us as u64));
                timer.start();
            }
            TimerCmd::Disarm => timer.stop(),
        }
    }
}

/// Drive every gate pin low.
fn all_gates_low(cs: critical_section::CriticalSection<'_>) {
    if let Some(pins) = GATE_PINS.borrow_ref_mut(cs).as_mut() {
        for pin in pins.iter_mut() {
            pin.set_low();
        }
    }
}

// ---------------------------------------------------------------------------
// Interrupt handlers
// ---------------------------------------------------------------------------

#[handler(priority = Priority::Priority3)]
fn zero_cross_isr() {
    critical_section::with(|cs| {
        {
            let mut input = ZERO_CROSS_IN.borrow_ref_mut(cs);
            let Some(input) = input.as_mut() else {
                return;
            };
            if !input.is_interrupt_set() {
                return;
            }
            input.clear_interrupt();
        }

        if let Some(cmd) = ENGINE.borrow_ref_mut(cs).on_zero_cross(now_us()) {
            exec_timer_cmd(cs, cmd);
        }
    });
}

#[handler(priority = Priority::Priority3)]
fn gate_timer_isr() {
    critical_section::with(|cs| {
        if let Some(timer) = FIRE_TIMER.borrow_ref_mut(cs).as_mut() {
            timer.clear_interrupt();
        }

        let Some(group) = ENGINE.borrow_ref_mut(cs).begin_fire() else {
            exec_timer_cmd(cs, TimerCmd::Disarm);
            return;
        };

        {
            let mut pins = GATE_PINS.borrow_ref_mut(cs);
            let Some(pins) = pins.as_mut() else {
                return;
            };
            for (pin, fire) in pins.iter_mut().zip(group.channels.iter()) {
                if *fire {
                    pin.set_high();
                }
            }
            // The only blocking wait in interrupt context.
            Delay::new().delay_micros(TRIAC_PULSE_US);
            for pin in pins.iter_mut() {
                pin.set_low();
            }
        }

        let cmd = ENGINE
            .borrow_ref_mut(cs)
            .finish_fire(group.target_delay_us);
        exec_timer_cmd(cs, cmd);
    });
}

// ---------------------------------------------------------------------------
// Bring-up
// ---------------------------------------------------------------------------

#[esp_hal::main]
fn main() -> ! {
    rtt_target::rtt_init_defmt!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    info!("Initializing AC dimmer node {}...", DEVICE_ID);

    // Start the RTOS scheduler (required before esp-radio init)
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    // --- Gate outputs + zero-cross input ---
    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(zero_cross_isr);

    // Must match NUM_CHANNELS.
    let gate_pins: [Output<'static>; NUM_CHANNELS] = [
        Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO6, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO7, Level::Low, OutputConfig::default()),
    ];

    let mut zero_cross = Input::new(
        peripherals.GPIO10,
        InputConfig::default().with_pull(Pull::Up),
    );

    // --- One-shot gate timer ---
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    let fire_timer = timg1.timer0;
    fire_timer.set_interrupt_handler(gate_timer_isr);
    fire_timer.enable_auto_reload(false);
    fire_timer.enable_interrupt(true);

    critical_section::with(|cs| {
        GATE_PINS.borrow_ref_mut(cs).replace(gate_pins);
        zero_cross.listen(Event::FallingEdge);
        ZERO_CROSS_IN.borrow_ref_mut(cs).replace(zero_cross);
        FIRE_TIMER.borrow_ref_mut(cs).replace(fire_timer);
    });
    info!("Phase-control engine armed on {} channels", NUM_CHANNELS);

    // --- Wi-Fi STA + network stack ---
    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio_controller: &'static esp_radio::Controller<'static> =
        RADIO.init(esp_radio::init().expect("failed to init esp-radio"));

    let (wifi_controller, interfaces) = esp_radio::wifi::new(
        radio_controller,
        peripherals.WIFI,
        esp_radio::wifi::Config::default(),
    )
    .expect("failed to create wifi");

    let mut rng = Rng::new(peripherals.RNG);
    let seed = ((rng.random() as u64) << 32) | rng.random() as u64;

    static RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::new()),
        seed,
    );

    // Start embassy executor
    static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(move |spawner| {
        spawner.must_spawn(net_task(runner));
        spawner.must_spawn(wifi_task(wifi_controller));
        spawner.must_spawn(sntp_task(stack));
        spawner.must_spawn(fast_ingress_task(stack));
        spawner.must_spawn(session_task(stack));
        spawner.must_spawn(control_task());
    })
}

/// Runs the embassy-net network stack.
#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, esp_radio::wifi::WifiDevice<'static>>) {
    runner.run().await;
}

/// Keeps the station associated, reconnecting with a fixed backoff.
#[embassy_executor::task]
async fn wifi_task(mut controller: WifiController<'static>) {
    let client_config = ClientConfig::default()
        .with_ssid(WIFI_SSID.to_string())
        .with_password(WIFI_PASSWORD.to_string());
    controller
        .set_config(&ModeConfig::Client(client_config))
        .expect("failed to set wifi config");
    controller.start().expect("failed to start wifi");

    loop {
        if sta_state() != WifiStaState::Connected {
            info!("Wi-Fi connecting to {}...", WIFI_SSID);
            if let Err(e) = controller.connect() {
                warn!("Wi-Fi connect failed: {}", Debug2Format(&e));
            }
        }
        Timer::after(Duration::from_secs(5)).await;
    }
}

// ---------------------------------------------------------------------------
// Time synchronization
// ---------------------------------------------------------------------------

/// Queries the NTP server candidates and anchors the wall-clock.
#[embassy_executor::task]
async fn sntp_task(stack: Stack<'static>) {
    stack.wait_config_up().await;

    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; 256];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0u8; 256];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket.bind(2390).expect("failed to bind SNTP socket");

    loop {
        let mut synced = false;
        for server in NTP_SERVERS {
            let Some(addr) = resolve(stack, server).await else {
                continue;
            };

            let mut request = [0u8; SNTP_PACKET_LEN];
            clock::build_request(&mut request);
            if socket.send_to(&request, (addr, 123)).await.is_err() {
                continue;
            }

            let mut response = [0u8; 128];
            match with_timeout(Duration::from_secs(2), socket.recv_from(&mut response)).await {
                Ok(Ok((len, _))) => {
                    let Some(unix_ms) = clock::parse_response(&response[..len]) else {
                        warn!("SNTP: unusable response from {}", server);
                        continue;
                    };
                    let local = boot_ms();
                    let valid = {
                        let mut wall = CLOCK.lock().await;
                        wall.sync(unix_ms, local);
                        wall.is_valid(local)
                    };
                    info!(
                        "SNTP synced from {}: unix_ms={} time_valid={}",
                        server, unix_ms, valid
                    );
                    synced = true;
                    break;
                }
                _ => warn!("SNTP: no response from {}", server),
            }
        }

        let retry_s = if synced { SNTP_RESYNC_INTERVAL_S } else { 15 };
        Timer::after(Duration::from_secs(retry_s)).await;
    }
}

// ---------------------------------------------------------------------------
// Fast ingress (UDP)
// ---------------------------------------------------------------------------

/// Receives LED v1 datagrams and feeds them to the arbiter as fast frames.
#[embassy_executor::task]
async fn fast_ingress_task(stack: Stack<'static>) {
    stack.wait_config_up().await;

    let mut rx_meta = [PacketMetadata::EMPTY; 8];
    let mut rx_buffer = [0u8; 1024];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buffer = [0u8; 64];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket.bind(UDP_PORT).expect("failed to bind fast socket");
    info!("Fast ingress listening on UDP port {}", UDP_PORT);

    let mut buf = [0u8; 512];
    loop {
        let (len, _) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(_) => continue,
        };
        // Malformed datagrams (with the raw fallback disabled) just drop.
        let Some(frame) = fastpkt::decode(&buf[..len]) else {
            continue;
        };
        let applied = ARBITER.lock().await.set_fast(frame, boot_ms());
        if let Some(levels) = applied {
            engine_apply(levels);
        }
    }
}

// ---------------------------------------------------------------------------
// Broker session (MQTT)
// ---------------------------------------------------------------------------

/// Broker session supervisor: connect, subscribe, pump messages, publish the
/// heartbeat, and retry with a fixed backoff on any failure.
#[embassy_executor::task]
async fn session_task(stack: Stack<'static>) {
    stack.wait_config_up().await;

    let mut rx_buffer = [0u8; 4096];
    let mut tx_buffer = [0u8; 4096];
    let mut mqtt_rx = [0u8; 4096];
    let mut mqtt_tx = [0u8; 4096];

    loop {
        let Some(addr) = resolve(stack, MQTT_BROKER_HOST).await else {
            Timer::after(Duration::from_millis(MQTT_RECONNECT_INTERVAL_MS)).await;
            continue;
        };

        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(Duration::from_secs(30)));
        if let Err(e) = socket.connect((addr, MQTT_BROKER_PORT)).await {
            warn!("MQTT: TCP connect failed: {}", Debug2Format(&e));
            Timer::after(Duration::from_millis(MQTT_RECONNECT_INTERVAL_MS)).await;
            continue;
        }

        let mut config = MqttConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        config.add_client_id(DEVICE_ID);
        config.add_max_subscribe_qos(QualityOfService::QoS1);
        config.max_packet_size = 4096;
        let mut client =
            MqttClient::<_, 5, _>::new(socket, &mut mqtt_tx, 4096, &mut mqtt_rx, 4096, config);

        if let Err(code) = client.connect_to_broker().await {
            warn!("MQTT: broker handshake failed: {}", Debug2Format(&code));
            Timer::after(Duration::from_millis(MQTT_RECONNECT_INTERVAL_MS)).await;
            continue;
        }
        info!("MQTT connected to {}:{}", MQTT_BROKER_HOST, MQTT_BROKER_PORT);

        if client.subscribe_to_topic(MQTT_TOPIC_SET_STATIC).await.is_err()
            || client.subscribe_to_topic(MQTT_TOPIC_SET_PLAN).await.is_err()
        {
            warn!("MQTT: subscribe failed, reconnecting");
            Timer::after(Duration::from_millis(MQTT_RECONNECT_INTERVAL_MS)).await;
            continue;
        }
        info!(
            "MQTT subscribed: {} {}",
            MQTT_TOPIC_SET_STATIC, MQTT_TOPIC_SET_PLAN
        );

        // Heartbeat immediately on connect, then on a fixed cadence.
        let mut last_heartbeat = Instant::now();
        if publish_heartbeat(&mut client, stack).await.is_err() {
            warn!("MQTT: initial heartbeat failed");
            Timer::after(Duration::from_millis(MQTT_RECONNECT_INTERVAL_MS)).await;
            continue;
        }

        loop {
            match with_timeout(Duration::from_millis(250), client.receive_message()).await {
                Ok(Ok((topic, payload))) => dispatch_message(topic, payload).await,
                Ok(Err(code)) => {
                    warn!("MQTT: receive failed: {}", Debug2Format(&code));
                    break;
                }
                Err(_) => {} // poll timeout; fall through to the heartbeat check
            }

            if Instant::now().duration_since(last_heartbeat).as_millis() >= HEARTBEAT_PERIOD_MS {
                last_heartbeat = Instant::now();
                if publish_heartbeat(&mut client, stack).await.is_err() {
                    warn!("MQTT: heartbeat publish failed");
                    break;
                }
            }
        }

        Timer::after(Duration::from_millis(MQTT_RECONNECT_INTERVAL_MS)).await;
    }
}

/// Route an inbound broker message to the matching ingress path.
async fn dispatch_message(topic: &str, payload: &[u8]) {
    if topic == MQTT_TOPIC_SET_STATIC {
        match messages::parse_static(payload) {
            Some(frame) => {
                info!("static setpoint: {}", frame);
                let applied = ARBITER.lock().await.set_static(frame);
                if let Some(levels) = applied {
                    engine_apply(levels);
                }
            }
            None => warn!("static payload dropped (malformed)"),
        }
    } else if topic == MQTT_TOPIC_SET_PLAN {
        let now_ms = {
            let wall = CLOCK.lock().await;
            wall.now_ms(boot_ms())
        };
        match messages::parse_plan(payload, now_ms) {
            Ok(update) => {
                let (accepted, rejected, pending) = {
                    let mut schedule = SCHEDULE.lock().await;
                    if update.replace {
                        schedule.clear();
                    }
                    let mut accepted = 0usize;
                    let mut rejected = 0usize;
                    for step in &update.steps {
                        if schedule.add(*step) {
                            accepted += 1;
                        } else {
                            rejected += 1;
                        }
                    }
                    (accepted, rejected, schedule.len())
                };
                if rejected > 0 {
                    warn!("schedule full: dropped {} plan steps", rejected);
                }
                if accepted > 0 {
                    info!("plan accepted: {} steps ({} pending)", accepted, pending);
                    let applied = ARBITER.lock().await.force_mode(ControlMode::Planned);
                    if let Some(levels) = applied {
                        engine_apply(levels);
                    }
                }
            }
            Err(PlanError::UnsupportedVersion(version)) => {
                warn!("plan dropped: unsupported format_version {}", version);
            }
            Err(_) => warn!("plan payload dropped (malformed)"),
        }
    }
}

/// Publish one heartbeat with the current mode and address.
async fn publish_heartbeat(
    client: &mut MqttClient<'_, TcpSocket<'_>, 5, CountingRng>,
    stack: Stack<'static>,
) -> Result<(), ()> {
    let mut ip: heapless::String<16> = heapless::String::new();
    match stack.config_v4() {
        Some(config) => {
            let _ = write!(ip, "{}", config.address.address());
        }
        None => {
            let _ = ip.push_str("0.0.0.0");
        }
    }

    let mode = ARBITER.lock().await.mode();
    let heartbeat = Heartbeat {
        device_id: DEVICE_ID,
        uptime: Instant::now().as_secs(),
        firmware: FIRMWARE_VERSION,
        ip: &ip,
        mode: mode.as_str(),
    };

    let mut buf = [0u8; 256];
    let len = messages::serialize_heartbeat(&heartbeat, &mut buf).ok_or(())?;
    client
        .send_message(MQTT_TOPIC_HEARTBEAT, &buf[..len], QualityOfService::QoS0, false)
        .await
        .map_err(|_| ())
}

// ---------------------------------------------------------------------------
// Control tick
// ---------------------------------------------------------------------------

/// The 10 ms cooperative tick: engine watchdog, fast-stream timeout, planned
/// frame drive (gated on wall-clock validity), stale-plan pruning, and the
/// periodic status report.
#[embassy_executor::task]
async fn control_task() {
    let mut last_report = Instant::now();

    loop {
        // Engine safety watchdog.
        let event = critical_section::with(|cs| {
            let event = ENGINE.borrow_ref_mut(cs).check_watchdog(now_us());
            if event == WatchdogEvent::SignalLost {
                all_gates_low(cs);
                exec_timer_cmd(cs, TimerCmd::Disarm);
            }
            event
        });
        match event {
            WatchdogEvent::SignalLost => warn!("zero-cross lost: outputs forced off"),
            WatchdogEvent::SignalRecovered => info!("zero-cross signal recovered"),
            WatchdogEvent::Healthy => {}
        }

        // Fast-stream timeout fallback.
        {
            let mut arbiter = ARBITER.lock().await;
            if let Some(levels) = arbiter.poll_timeout(boot_ms()) {
                let mode = arbiter.mode();
                drop(arbiter);
                warn!("fast stream timed out, falling back to {}", mode.as_str());
                engine_apply(levels);
            }
        }

        // Planned drive, gated on the one-way time-valid latch. Frames queue
        // regardless; they only reach the engine once the clock is real.
        let wall_now = {
            let mut wall = CLOCK.lock().await;
            let local = boot_ms();
            if wall.is_valid(local) {
                Some(wall.now_ms(local))
            } else {
                None
            }
        };
        if let Some(wall_now) = wall_now {
            let mode = ARBITER.lock().await.mode();
            if mode == ControlMode::Planned {
                let frame = {
                    let mut schedule = SCHEDULE.lock().await;
                    if schedule.has_schedule() {
                        schedule.current_frame(wall_now)
                    } else {
                        None
                    }
                };
                if let Some(frame) = frame {
                    let applied = ARBITER.lock().await.set_planned(frame);
                    if let Some(levels) = applied {
                        engine_apply(levels);
                    }
                }
            } else {
                // Not driving from the schedule: shed any stale backlog so a
                // later fallback to PLANNED does not replay it.
                let pruned = SCHEDULE.lock().await.prune_stale(wall_now);
                if pruned > 0 {
                    info!("pruned {} stale plan steps", pruned);
                }
            }
        }

        if Instant::now().duration_since(last_report).as_millis() >= STATUS_REPORT_MS {
            last_report = Instant::now();
            status_report().await;
        }

        Timer::after(Duration::from_millis(10)).await;
    }
}

/// Periodic one-line status report.
async fn status_report() {
    let (healthy, emergency, last_zc, last_fire, levels) = critical_section::with(|cs| {
        let engine = ENGINE.borrow_ref(cs);
        (
            engine.is_zero_cross_healthy(),
            engine.is_emergency(),
            engine.last_zero_cross_us(),
            engine.last_fire_delay_us(),
            engine.levels(),
        )
    });

    let (mode, average) = {
        let arbiter = ARBITER.lock().await;
        (arbiter.mode(), arbiter.average_brightness())
    };
    let (pending, next_ts) = {
        let schedule = SCHEDULE.lock().await;
        (schedule.len(), schedule.next_ts())
    };

    info!(
        "status: mode={} avg={} zc_healthy={} emergency={} last_zc_us={} last_fire_us={} levels={} sched_pending={} sched_next={}",
        mode.as_str(),
        average,
        healthy,
        emergency,
        last_zc,
        last_fire,
        levels,
        pending,
        next_ts
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve a broker/NTP host: dotted-quad fast path, DNS otherwise.
async fn resolve(stack: Stack<'static>, host: &str) -> Option<IpAddress> {
    if let Ok(ip) = host.parse::<core::net::Ipv4Addr>() {
        return Some(IpAddress::Ipv4(ip));
    }
    match stack.dns_query(host, DnsQueryType::A).await {
        Ok(addrs) => addrs.first().copied(),
        Err(e) => {
            warn!("DNS lookup for {} failed: {}", host, Debug2Format(&e));
            None
        }
    }
}
