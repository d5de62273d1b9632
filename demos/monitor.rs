use hyena_ebike::{
    ChannelSink, EBikeMonitor, Reading, Result, SensorKind, SnapshotStore, TelemetrySink,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚲 Hyena E-Bike Telemetry Monitor");
    info!("Searching for e-bikes (name prefix XWTK)...");

    let monitor = match EBikeMonitor::connect_first().await {
        Ok(monitor) => {
            let device = monitor.device_info();
            info!(
                "✅ Connected to: {} ({} {}, {})",
                device.name, device.manufacturer, device.model, device.address
            );
            monitor
        }
        Err(e) => {
            error!("❌ Failed to connect to e-bike: {}", e);
            return Err(e);
        }
    };

    let (channel, mut updates) = ChannelSink::new();
    let store = SnapshotStore::new();
    let sink = Fanout {
        channel,
        store: store.clone(),
    };

    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update.reading {
                Reading::Battery(battery) => println!("🔋 Battery: {battery}"),
                Reading::Temperature(temp) => println!("🌡️  Battery temperature: {temp}"),
            }
        }
    });

    let stats = monitor.run(&sink).await?;
    drop(sink);
    if let Err(e) = printer.await {
        error!("❌ Printer task failed: {}", e);
    }

    let address = monitor.device_info().address;
    println!("\n📊 Session Summary:");
    println!("  Notifications: {}", stats.notifications);
    println!("  Readings:      {}", stats.readings);
    println!("  Unrecognized:  {}", stats.unrecognized);
    println!("  Malformed:     {}", stats.malformed);

    if let Some(snapshot) = store.snapshot(address).await {
        for kind in SensorKind::ALL {
            let value = match kind {
                SensorKind::Battery => snapshot.battery.map(|b| b.to_string()),
                SensorKind::Temperature => snapshot.temperature.map(|t| t.to_string()),
            };
            println!(
                "  {:<20} {}",
                kind.to_string(),
                value.unwrap_or_else(|| "unavailable".to_string())
            );
        }
    }

    info!("🎉 Monitoring completed");
    Ok(())
}

/// Prints every update and keeps the latest values
struct Fanout {
    channel: ChannelSink,
    store: SnapshotStore,
}

#[async_trait::async_trait]
impl TelemetrySink for Fanout {
    async fn publish(&self, update: hyena_ebike::TelemetryUpdate) -> Result<()> {
        self.store.publish(update).await?;
        self.channel.publish(update).await
    }
}
