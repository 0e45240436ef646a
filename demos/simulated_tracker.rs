use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use trackerd::{
    ble::{Characteristic, LinkEvent},
    sim::SimBoard,
    types::Acceleration,
    DeviceRuntime, ReportCadence, RuntimeSettings, TickOutcome,
};

/// Plays the part of a phone app talking to the tracker
async fn peer(board: SimBoard) {
    sleep(Duration::from_millis(300)).await;
    info!("📱 Peer connecting");
    board.link.push(LinkEvent::Connected);

    sleep(Duration::from_millis(500)).await;
    info!("📱 Writing configuration");
    board.link.write_config(
        br#"{"wifi_ssid":"HomeNet","wifi_password":"correct horse",
            "device_id":"2f1b9c1e-6a53-4f59-9d0e-3b1f0c7d2a11",
            "api_endpoint":"https://api.example.com/v1/track","transmit_interval":30}"#,
    );

    sleep(Duration::from_millis(700)).await;
    info!("🚶 Shaking the tracker");
    board.motion.set_acceleration(Acceleration { x: 0.9, y: 0.4, z: 1.1 });
    sleep(Duration::from_millis(300)).await;
    board.motion.set_acceleration(Acceleration { x: 0.0, y: 0.0, z: 1.0 });

    info!("📱 Sending locate");
    board.link.write_command(br#"{"command":"locate"}"#);

    sleep(Duration::from_millis(1_000)).await;
    info!("📱 Peer disconnecting");
    board.link.push(LinkEvent::Disconnected);
}

#[tokio::main]
async fn main() -> trackerd::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📍 trackerd simulated tracker");

    let board = SimBoard::new();
    board.network.join_after_polls(3);

    let settings = RuntimeSettings {
        inactivity_timeout_ms: 4_000,
        idle_grace_ms: 1_000,
        report_cadence: ReportCadence::Fixed { interval_ms: 500 },
        ..Default::default()
    };
    let mut runtime = DeviceRuntime::boot(settings, board.hardware_with_system_clock());

    tokio::spawn(peer(board.clone()));

    let outcome = runtime.run(Duration::from_millis(50)).await;

    let reports = board.link.notifications(Characteristic::Status);
    info!("📊 Status reports pushed: {}", reports.len());
    if let Some(last) = reports.last() {
        info!("📊 Last report: {}", String::from_utf8_lossy(last));
    }
    info!("💡 Indicator patterns played: {}", board.indicator.patterns().len());
    info!("🔧 Paired: {}", runtime.config().paired);

    match outcome {
        TickOutcome::Sleeping => info!("😴 Tracker asleep, wake sources {:?}", board.system.sleeps()),
        TickOutcome::Restarting => info!("🔄 Tracker restarting"),
        TickOutcome::Continue => {}
    }

    Ok(())
}
