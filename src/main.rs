use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use wearable_session::domain::models::{
    CompatibilityResult, Peripheral, PeripheralId, RadioAddress, SampleReading, SessionEvent,
    Vector3,
};
use wearable_session::domain::settings::SettingsService;
use wearable_session::infrastructure::bluetooth::radio::RadioSupport;
use wearable_session::infrastructure::bluetooth::service::describe_snapshot;
use wearable_session::infrastructure::bluetooth::simulated::SimulatedRadio;
use wearable_session::infrastructure::logging;
use wearable_session::{IntensityMonitor, SessionConfig, SessionManager};

const DEMO_TICKS: u32 = 40;
const TICK: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings = match SettingsService::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Settings unavailable ({}), using defaults", e);
            SettingsService::with_path(std::env::temp_dir().join("wearable_session.json"))
        }
    };
    let _logging_guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting wearable session demo");

    let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
    radio.advertise(vec![
        Peripheral::new(
            "wrist-01",
            "Party Band 01",
            RadioAddress::Mac([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]),
        ),
        Peripheral::new(
            "wrist-02",
            "Party Band 02",
            RadioAddress::Mac([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x02]),
        ),
    ]);
    radio.set_latency(Duration::from_millis(300));

    let session = SessionManager::new(
        radio.clone(),
        SessionConfig::from_settings(&settings.get().session),
    );
    session.subscribe_all(|event| {
        match event {
            SessionEvent::Sample(_) => {}
            other => info!("Session event: {:?}", other),
        }
        Ok(())
    });

    if let CompatibilityResult::Incompatible { reason } = session.initialize().await? {
        warn!("Wearable integration unavailable: {}", reason);
        return Ok(());
    }

    let devices = session.scan().await?;
    let preferred = settings
        .get()
        .last_connected_peripheral
        .clone()
        .map(PeripheralId::new)
        .filter(|id| devices.iter().any(|p| &p.id == id));
    let peripheral = match preferred {
        Some(id) => {
            session.connect(&id).await?;
            id
        }
        None => session.connect_first_available().await?.id,
    };
    if let Err(e) = settings.remember_peripheral(peripheral.as_str()) {
        warn!("Could not save preferred wearable: {}", e);
    }

    let monitor = IntensityMonitor::attach(session.bus());
    let wrist = tokio::spawn(simulate_wrist(radio.clone()));

    for tick in 0..DEMO_TICKS {
        tokio::time::sleep(TICK).await;
        if tick == DEMO_TICKS / 2 {
            info!("Simulating the wearable walking out of range");
            radio.drop_link();
        }
        if tick % 4 == 0 {
            info!(
                "state={} intensity={:?} snapshot={:?}",
                session.state(),
                monitor.current(),
                describe_snapshot(session.snapshot())
            );
        }
    }

    wrist.abort();
    session.disconnect().await?;
    info!("Demo finished in state {}", session.state());
    Ok(())
}

/// Heart rate ramping through every intensity band, plus gentle motion.
async fn simulate_wrist(radio: Arc<SimulatedRadio>) {
    let mut interval = tokio::time::interval(TICK / 2);
    let mut step: u32 = 0;
    loop {
        interval.tick().await;
        let phase = f64::from(step % 80) / 80.0;
        let bpm = 70.0 + 70.0 * (phase * std::f64::consts::PI).sin();
        radio.emit_sample(SampleReading::HeartRate { bpm });
        radio.emit_sample(SampleReading::Motion(Vector3::new(
            0.05 * phase,
            -0.02,
            0.98,
        )));
        radio.emit_sample(SampleReading::Gyroscope(Vector3::new(
            12.0 * phase,
            3.0,
            -1.5,
        )));
        step += 1;
    }
}
