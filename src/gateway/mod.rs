//! # Gateway Loop
//!
//! The control state machine. One tick runs, in order:
//!
//! 1. Drain collaborator events (link changes, button edges, exit)
//! 2. Confirm a pending long-press and refresh the link LED
//! 3. Read the battery and apply the low-battery cut
//! 4. Advance the battery report counter, reporting on wrap if a phone is connected
//! 5. Retune if the stored frequency changed, then poll the radio; nothing
//!    received ends the tick
//! 6. Decode, log the summary, and relay on an ID2 match while the link is up
//!
//! Every failure inside a tick is logged and the loop carries on. Only an
//! operator exit or Ctrl+C stops it.

pub mod events;
pub mod link;
pub mod power;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::ble::RelaySink;
use crate::board::{battery_percent, format_percent, BatterySensor, PowerOutputs};
use crate::config::Config;
use crate::error::GatewayError;
use crate::packet::cipher::KEY_SIZE;
use crate::packet::decoder::PacketDecoder;
use crate::radio::RadioLink;
use crate::settings::SettingsStore;
use crate::telemetry::logger::TelemetryLog;
use events::{EventReceiver, GatewayEvent};
use link::ConnectionState;
use power::PowerGuard;

/// What a single tick ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing received
    Idle,
    /// A response arrived but did not decode
    Dropped,
    /// Decoded and logged, not relayed
    Logged,
    /// Decoded, logged and sent to the phone
    Relayed,
    /// Operator asked to stop
    Exit,
}

/// Hardware the loop drives
pub struct Peripherals<R, S, B, O> {
    pub radio: R,
    pub sink: S,
    pub battery: B,
    pub outputs: O,
}

/// State shared with the operator console
#[derive(Debug, Clone)]
pub struct SharedState {
    pub settings: Arc<Mutex<SettingsStore>>,
    pub log: Arc<Mutex<TelemetryLog>>,
}

/// Settings copied out of the store once per tick
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    device_id2: u32,
    frequency_hz: u32,
    key: [u8; KEY_SIZE],
}

pub struct Gateway<R, S, B, O> {
    peripherals: Peripherals<R, S, B, O>,
    shared: SharedState,
    events: EventReceiver,
    link: ConnectionState,
    power: PowerGuard,
    decoder: PacketDecoder,
    decoder_key: [u8; KEY_SIZE],
    tuned_hz: u32,
    link_led: Option<bool>,
    report_counter: u32,
    report_interval: u32,
    low_battery_volts: f64,
    full_battery_volts: f64,
    tick_period: Duration,
}

impl<R, S, B, O> Gateway<R, S, B, O>
where
    R: RadioLink,
    S: RelaySink,
    B: BatterySensor,
    O: PowerOutputs,
{
    pub fn new(
        config: &Config,
        peripherals: Peripherals<R, S, B, O>,
        shared: SharedState,
        events: EventReceiver,
    ) -> Self {
        let zero_key = [0u8; KEY_SIZE];
        Self {
            peripherals,
            shared,
            events,
            link: ConnectionState::new(Instant::now()),
            power: PowerGuard::new(
                config.power.low_battery_volts,
                Duration::from_millis(config.power.long_press_ms),
            ),
            decoder: PacketDecoder::new(&zero_key),
            decoder_key: zero_key,
            tuned_hz: 0,
            link_led: None,
            report_counter: 0,
            report_interval: config.gateway.battery_report_interval_ticks.max(1),
            low_battery_volts: config.power.low_battery_volts,
            full_battery_volts: config.power.full_battery_volts,
            tick_period: Duration::from_millis(config.gateway.tick_ms),
        }
    }

    /// Whether a phone is connected
    pub fn link_up(&self) -> bool {
        self.link.is_up()
    }

    /// Current battery report counter
    pub fn report_counter(&self) -> u32 {
        self.report_counter
    }

    /// Power up, start advertising and tune the radio
    pub async fn start(&mut self) {
        self.power.power_up(&mut self.peripherals.outputs);

        if let Err(e) = self.peripherals.sink.advertise().await {
            warn!("Failed to start advertising: {}", e);
        }

        let snapshot = self.snapshot().await;
        self.refresh_decoder(&snapshot);
        self.retune(snapshot.frequency_hz).await;
    }

    /// Run ticks until exit or Ctrl+C
    pub async fn run(mut self) {
        let mut ticker = interval(self.tick_period);

        info!("Gateway loop running every {:?}", self.tick_period);
        info!("Press Ctrl+C to exit");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick(Instant::now()).await == TickOutcome::Exit {
                        info!("Exit requested, stopping gateway loop");
                        break;
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                    break;
                }
            }
        }

        if let Err(e) = self.shared.log.lock().await.save() {
            warn!("Failed to save log on shutdown: {}", e);
        }
    }

    /// Run one loop iteration
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.drain_events(now).await {
            return TickOutcome::Exit;
        }

        self.power.poll_long_press(now, &mut self.peripherals.outputs);
        self.update_link_led(now);

        let volts = match self.peripherals.battery.read_volts() {
            Ok(volts) => {
                self.power.check_battery(volts, &mut self.peripherals.outputs);
                Some(volts)
            }
            Err(e) => {
                warn!("Battery read failed: {}", e);
                None
            }
        };

        self.advance_battery_report(volts).await;

        let snapshot = self.snapshot().await;
        if snapshot.frequency_hz != self.tuned_hz {
            self.retune(snapshot.frequency_hz).await;
        }

        let response = match self.peripherals.radio.poll().await {
            Ok(Some(response)) => response,
            Ok(None) => return TickOutcome::Idle,
            Err(e) => {
                warn!("Radio poll failed: {}", e);
                return TickOutcome::Idle;
            }
        };

        self.refresh_decoder(&snapshot);

        let packet = match self.decoder.decode(Some(&response)) {
            Ok(packet) => packet,
            Err(GatewayError::FrameMalformed(reason)) => {
                debug!("Ignoring radio response ({}): {:?}", reason, response);
                return TickOutcome::Dropped;
            }
            Err(e) => {
                warn!("Dropping packet: {}", e);
                return TickOutcome::Dropped;
            }
        };
        info!("LokoMessage: {}", packet.message);

        self.shared.log.lock().await.add_entry(&packet.telemetry.summary());

        if packet.telemetry.id2 != snapshot.device_id2 {
            debug!(
                "Received unexpected ID2={}, Expected={}",
                packet.telemetry.id2, snapshot.device_id2
            );
            return TickOutcome::Logged;
        }

        if !self.link.is_up() {
            info!("BLE not connected");
            return TickOutcome::Logged;
        }

        match self.peripherals.sink.notify(&packet.message).await {
            Ok(()) => TickOutcome::Relayed,
            Err(e) => {
                warn!("BLE Send error: {}", e);
                TickOutcome::Logged
            }
        }
    }

    /// Apply queued events; returns whether exit was requested
    async fn drain_events(&mut self, now: Instant) -> bool {
        while let Ok(event) = self.events.try_recv() {
            match event {
                GatewayEvent::LinkUp => {
                    self.link.set_up(now);
                }
                GatewayEvent::LinkDown => {
                    if self.link.set_down(now) {
                        if let Err(e) = self.peripherals.sink.advertise().await {
                            warn!("Failed to restart advertising: {}", e);
                        }
                    }
                }
                GatewayEvent::ButtonPressed(at) => self.power.on_button_pressed(at),
                GatewayEvent::ButtonReleased(at) => {
                    self.power.on_button_released(at, &mut self.peripherals.outputs);
                }
                GatewayEvent::ExitRequested => return true,
            }
        }
        false
    }

    fn update_link_led(&mut self, now: Instant) {
        let on = self.link.led_on(now);
        if self.link_led == Some(on) {
            return;
        }
        match self.peripherals.outputs.set_link_led(on) {
            Ok(()) => self.link_led = Some(on),
            Err(e) => debug!("Failed to drive link LED: {}", e),
        }
    }

    async fn advance_battery_report(&mut self, volts: Option<f64>) {
        self.report_counter += 1;
        if self.report_counter < self.report_interval {
            return;
        }
        self.report_counter = 0;

        let (Some(volts), true) = (volts, self.link.is_up()) else {
            return;
        };

        let percent = battery_percent(volts, self.low_battery_volts, self.full_battery_volts);
        if let Err(e) = self.peripherals.sink.notify(&format_percent(percent)).await {
            warn!("BLE Send error: {}", e);
        }
    }

    async fn snapshot(&self) -> Snapshot {
        let store = self.shared.settings.lock().await;
        let settings = store.get();
        Snapshot {
            device_id2: settings.device_id2,
            frequency_hz: settings.radio_frequency_hz,
            key: settings.preshared_key(),
        }
    }

    fn refresh_decoder(&mut self, snapshot: &Snapshot) {
        if snapshot.key != self.decoder_key {
            self.decoder = PacketDecoder::new(&snapshot.key);
            self.decoder_key = snapshot.key;
            debug!("Pre-shared key loaded");
        }
    }

    /// Tune once per frequency change; a failed attempt is not retried
    async fn retune(&mut self, frequency_hz: u32) {
        self.tuned_hz = frequency_hz;
        if let Err(e) = self.peripherals.radio.tune(frequency_hz).await {
            warn!("Failed to tune radio to {} Hz: {}", frequency_hz, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::MockRelaySink;
    use crate::board::{MockBatterySensor, MockPowerOutputs};
    use crate::radio::MockRadioLink;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    // "123,321,40.376123,49.850848,3420" hex-encoded
    const TEXT_FRAME: &str = "+TEST: RX \"3132332C3332312C34302E3337363132332C34392E3835303834382C33343230\"\r\n";

    type TestGateway = Gateway<MockRadioLink, MockRelaySink, MockBatterySensor, MockPowerOutputs>;

    struct Harness {
        gateway: TestGateway,
        events: events::EventSender,
        shared: SharedState,
        _dir: TempDir,
    }

    fn quiet_outputs() -> MockPowerOutputs {
        let mut outputs = MockPowerOutputs::new();
        outputs.expect_set_power().returning(|_| Ok(()));
        outputs.expect_set_indicator().returning(|_| Ok(()));
        outputs.expect_set_link_led().returning(|_| Ok(()));
        outputs
    }

    fn healthy_battery() -> MockBatterySensor {
        let mut battery = MockBatterySensor::new();
        battery.expect_read_volts().returning(|| Ok(3.9));
        battery
    }

    fn radio_with(responses: Vec<Option<String>>) -> MockRadioLink {
        let mut radio = MockRadioLink::new();
        let mut responses = responses.into_iter();
        radio.expect_poll().returning(move || Ok(responses.next().flatten()));
        radio
    }

    fn harness(
        radio: MockRadioLink,
        sink: MockRelaySink,
        battery: MockBatterySensor,
        outputs: MockPowerOutputs,
        config: Config,
        device_id2: u32,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut store = SettingsStore::load(dir.path().join("settings.json"));
        store.set_device_id2(device_id2).unwrap();
        let log = TelemetryLog::new(config.log.max_entries, None);

        let shared = SharedState {
            settings: Arc::new(Mutex::new(store)),
            log: Arc::new(Mutex::new(log)),
        };
        let (tx, rx) = events::channel();
        let mut gateway = Gateway::new(
            &config,
            Peripherals { radio, sink, battery, outputs },
            shared.clone(),
            rx,
        );
        // Tests that skip start() begin already tuned to the stored frequency
        gateway.tuned_hz = shared_frequency();

        Harness {
            gateway,
            events: tx,
            shared,
            _dir: dir,
        }
    }

    fn shared_frequency() -> u32 {
        crate::settings::DEFAULT_FREQUENCY_HZ
    }

    async fn log_len(shared: &SharedState) -> usize {
        shared.log.lock().await.len()
    }

    #[tokio::test]
    async fn test_idle_tick_when_radio_is_silent() {
        let mut h = harness(
            radio_with(vec![]),
            MockRelaySink::new(),
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            321,
        );

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Idle);
        assert_eq!(log_len(&h.shared).await, 0);
    }

    #[tokio::test]
    async fn test_match_with_link_up_is_relayed_verbatim() {
        let mut sink = MockRelaySink::new();
        sink.expect_notify()
            .with(eq("123,321,40.376123,49.850848,3420"))
            .times(1)
            .returning(|_| Ok(()));

        let mut h = harness(
            radio_with(vec![Some(TEXT_FRAME.to_string())]),
            sink,
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            321,
        );
        h.events.send(GatewayEvent::LinkUp).unwrap();

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Relayed);

        let log = h.shared.log.lock().await;
        let entry = log.entries().next().unwrap();
        assert_eq!(entry.data, "ID1=123, ID2=321, LAT=40.376123, LON=49.850848, VBAT=3420");
    }

    #[tokio::test]
    async fn test_link_down_never_reaches_sink() {
        let mut sink = MockRelaySink::new();
        sink.expect_notify().never();

        let mut h = harness(
            radio_with(vec![Some(TEXT_FRAME.to_string())]),
            sink,
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            321,
        );

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Logged);
        assert_eq!(log_len(&h.shared).await, 1, "Packet is logged even when not relayed");
    }

    #[tokio::test]
    async fn test_id2_mismatch_is_logged_not_relayed() {
        let mut sink = MockRelaySink::new();
        sink.expect_notify().never();

        let mut h = harness(
            radio_with(vec![Some(TEXT_FRAME.to_string())]),
            sink,
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            999,
        );
        h.events.send(GatewayEvent::LinkUp).unwrap();

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Logged);
        assert_eq!(log_len(&h.shared).await, 1);
    }

    #[tokio::test]
    async fn test_response_without_payload_is_dropped_quietly() {
        let mut h = harness(
            radio_with(vec![Some("+TEST: RXLRPKT\r\n".to_string())]),
            MockRelaySink::new(),
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            321,
        );

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Dropped);
        assert_eq!(log_len(&h.shared).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_length_does_not_stop_the_loop() {
        let mut h = harness(
            radio_with(vec![
                Some("+TEST: RX \"00112233\"\r\n".to_string()),
                Some(TEXT_FRAME.to_string()),
            ]),
            MockRelaySink::new(),
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            1,
        );

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Dropped);
        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Logged);
    }

    #[tokio::test]
    async fn test_relay_failure_is_swallowed() {
        let mut sink = MockRelaySink::new();
        sink.expect_notify()
            .returning(|_| Err(GatewayError::RelayUnavailable("write failed".into())));

        let mut h = harness(
            radio_with(vec![Some(TEXT_FRAME.to_string())]),
            sink,
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            321,
        );
        h.events.send(GatewayEvent::LinkUp).unwrap();

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Logged);
    }

    #[tokio::test]
    async fn test_low_battery_cuts_power_once_per_tick() {
        let mut battery = MockBatterySensor::new();
        battery.expect_read_volts().returning(|| Ok(3.1));

        let mut outputs = MockPowerOutputs::new();
        outputs.expect_set_power().with(eq(false)).times(2).returning(|_| Ok(()));
        outputs.expect_set_link_led().returning(|_| Ok(()));

        let mut h = harness(
            radio_with(vec![Some(TEXT_FRAME.to_string())]),
            MockRelaySink::new(),
            battery,
            outputs,
            Config::default(),
            321,
        );

        // The decoded packet on the first tick does not change the cut policy
        h.gateway.tick(Instant::now()).await;
        h.gateway.tick(Instant::now()).await;
    }

    #[tokio::test]
    async fn test_battery_read_failure_is_not_fatal() {
        let mut battery = MockBatterySensor::new();
        battery
            .expect_read_volts()
            .returning(|| Err(GatewayError::PeripheralFault("adc".into())));

        let mut h = harness(
            radio_with(vec![Some(TEXT_FRAME.to_string())]),
            MockRelaySink::new(),
            battery,
            quiet_outputs(),
            Config::default(),
            321,
        );

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Logged);
    }

    #[tokio::test]
    async fn test_battery_report_on_counter_wrap() {
        let mut config = Config::default();
        config.gateway.battery_report_interval_ticks = 3;

        let mut sink = MockRelaySink::new();
        sink.expect_notify().with(eq("66.67")).times(2).returning(|_| Ok(()));

        let mut h = harness(
            radio_with(vec![]),
            sink,
            healthy_battery(),
            quiet_outputs(),
            config,
            321,
        );
        h.events.send(GatewayEvent::LinkUp).unwrap();

        let now = Instant::now();
        for tick in 1..=6 {
            h.gateway.tick(now).await;
            assert_eq!(h.gateway.report_counter(), tick % 3, "Counter after tick {}", tick);
        }
    }

    #[tokio::test]
    async fn test_battery_report_needs_link() {
        let mut config = Config::default();
        config.gateway.battery_report_interval_ticks = 2;

        let mut sink = MockRelaySink::new();
        sink.expect_notify().never();

        let mut h = harness(
            radio_with(vec![]),
            sink,
            healthy_battery(),
            quiet_outputs(),
            config,
            321,
        );

        for _ in 0..4 {
            h.gateway.tick(Instant::now()).await;
        }
        assert_eq!(h.gateway.report_counter(), 0, "Counter wraps without a link");
    }

    #[tokio::test]
    async fn test_link_down_restarts_advertising() {
        let mut sink = MockRelaySink::new();
        sink.expect_advertise().times(1).returning(|| Ok(()));

        let mut h = harness(
            radio_with(vec![]),
            sink,
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            321,
        );
        h.events.send(GatewayEvent::LinkUp).unwrap();
        h.events.send(GatewayEvent::LinkDown).unwrap();

        h.gateway.tick(Instant::now()).await;
        assert!(!h.gateway.link_up());
    }

    #[tokio::test]
    async fn test_exit_request_ends_tick_before_polling() {
        let mut radio = MockRadioLink::new();
        radio.expect_poll().never();

        let mut h = harness(
            radio,
            MockRelaySink::new(),
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            321,
        );
        h.events.send(GatewayEvent::ExitRequested).unwrap();

        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Exit);
    }

    #[tokio::test]
    async fn test_long_press_through_events() {
        let start = Instant::now();
        let mut outputs = MockPowerOutputs::new();
        outputs.expect_set_power().with(eq(true)).times(1).returning(|_| Ok(()));
        outputs.expect_set_indicator().times(1).returning(|_| Ok(()));
        outputs.expect_set_link_led().returning(|_| Ok(()));

        let mut h = harness(
            radio_with(vec![]),
            MockRelaySink::new(),
            healthy_battery(),
            outputs,
            Config::default(),
            321,
        );
        h.events.send(GatewayEvent::ButtonPressed(start)).unwrap();

        h.gateway.tick(start + Duration::from_millis(100)).await;
        h.gateway.tick(start + Duration::from_millis(2100)).await;
    }

    #[tokio::test]
    async fn test_release_between_ticks_still_toggles_power() {
        let start = Instant::now();
        let mut outputs = MockPowerOutputs::new();
        outputs.expect_set_power().with(eq(true)).times(1).returning(|_| Ok(()));
        outputs.expect_set_indicator().with(eq(true)).times(1).returning(|_| Ok(()));
        outputs.expect_set_link_led().returning(|_| Ok(()));

        let mut h = harness(
            radio_with(vec![]),
            MockRelaySink::new(),
            healthy_battery(),
            outputs,
            Config::default(),
            321,
        );
        h.events.send(GatewayEvent::ButtonPressed(start)).unwrap();
        h.gateway.tick(start + Duration::from_millis(1950)).await;

        h.events
            .send(GatewayEvent::ButtonReleased(start + Duration::from_millis(2010)))
            .unwrap();
        h.gateway.tick(start + Duration::from_millis(2050)).await;
    }

    #[tokio::test]
    async fn test_frequency_change_retunes_radio() {
        let mut radio = radio_with(vec![]);
        radio.expect_tune().with(eq(915_000_000)).times(1).returning(|_| Ok(()));

        let mut h = harness(
            radio,
            MockRelaySink::new(),
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            1,
        );
        h.shared.settings.lock().await.set_frequency_hz(915_000_000).unwrap();

        h.gateway.tick(Instant::now()).await;
        h.gateway.tick(Instant::now()).await;
    }

    #[tokio::test]
    async fn test_start_powers_up_advertises_and_tunes() {
        let mut radio = MockRadioLink::new();
        radio.expect_tune().with(eq(shared_frequency())).times(1).returning(|_| Ok(()));

        let mut sink = MockRelaySink::new();
        sink.expect_advertise().times(1).returning(|| Ok(()));

        let mut outputs = MockPowerOutputs::new();
        outputs.expect_set_power().with(eq(true)).times(1).returning(|_| Ok(()));
        outputs.expect_set_indicator().with(eq(false)).times(1).returning(|_| Ok(()));

        let mut h = harness(radio, sink, healthy_battery(), outputs, Config::default(), 1);
        h.gateway.start().await;
    }

    #[tokio::test]
    async fn test_key_change_is_picked_up() {
        use crate::packet::cipher::PresharedCipher;
        use crate::packet::checksum;
        use base64::Engine as _;

        let key = [0x42u8; KEY_SIZE];
        let mut block = [0u8; 16];
        block[0..4].copy_from_slice(&1.5f32.to_le_bytes());
        block[4..8].copy_from_slice(&2.5f32.to_le_bytes());
        block[8..10].copy_from_slice(&3900u16.to_le_bytes());
        checksum::seal(&mut block);
        PresharedCipher::new(&key).encrypt_block(&mut block);

        let text = format!("7,8,{}", base64::engine::general_purpose::STANDARD.encode(block));
        let frame = format!("+TEST: RX \"{}\"\r\n", hex::encode_upper(text));

        let mut h = harness(
            radio_with(vec![Some(frame.clone()), Some(frame)]),
            MockRelaySink::new(),
            healthy_battery(),
            quiet_outputs(),
            Config::default(),
            8,
        );

        let zero_key_opens = checksum::verify(
            &PresharedCipher::new(&[0u8; KEY_SIZE]).decrypt(&block).unwrap(),
        );
        let first = h.gateway.tick(Instant::now()).await;
        if !zero_key_opens {
            assert_eq!(first, TickOutcome::Dropped, "Wrong key fails the checksum");
        }

        h.shared
            .settings
            .lock()
            .await
            .set_preshared_key_hex(&hex::encode(key))
            .unwrap();
        assert_eq!(h.gateway.tick(Instant::now()).await, TickOutcome::Logged);
    }
}
