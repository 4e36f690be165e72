//! Connect to a ViPen sensor, stream readings, then download one waveform
//!
//! ```text
//! RUST_LOG=info cargo run -p vipen --features btleplug --example monitor -- \
//!     <service> <reading> <control> <wave-data> <user-data> [seconds]
//! ```

use anyhow::{Context, bail};
use std::sync::Arc;
use std::time::Duration;
use vipen::transport::{BtleplugTransport, GattProfile, Uuid};
use vipen::{ClientBuilder, SessionState};

fn parse_profile(args: &[String]) -> anyhow::Result<GattProfile> {
    if args.len() < 5 {
        bail!("usage: monitor <service> <reading> <control> <wave-data> <user-data> [seconds]");
    }
    let uuid = |i: usize| -> anyhow::Result<Uuid> {
        Uuid::parse_str(&args[i]).with_context(|| format!("invalid UUID '{}'", args[i]))
    };
    Ok(GattProfile {
        service: uuid(0)?,
        reading: uuid(1)?,
        control: uuid(2)?,
        wave_data: uuid(3)?,
        user_data: uuid(4)?,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let profile = parse_profile(&args)?;
    let seconds: u64 = match args.get(5) {
        Some(s) => s.parse().context("invalid duration")?,
        None => 10,
    };

    let transport = BtleplugTransport::new().await?;
    let client = ClientBuilder::new(profile).build(Arc::new(transport))?;

    let _readings = client.on_reading(|r| {
        println!(
            "velocity {:>7.2} mm/s  acceleration {:>7.2} m/s2  kurtosis {:>5.2}  temperature {:>5.1} C",
            r.velocity, r.acceleration, r.kurtosis, r.temperature
        );
    });
    let _link = client.on_link_lost(|| log::warn!("Link lost, reconnecting"));
    let _errors = client.on_error(|e| log::error!("{}", e));

    client.connect().await?;
    client.start_measurement().await?;
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    client.stop_measurement().await?;

    if client.state() == SessionState::Ready {
        let capture = client.download_waveform().await?;
        let samples = capture.scaled_samples();
        let peak = samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        println!(
            "waveform {}: {} samples, peak {:.3}",
            capture.header.wave_id,
            samples.len(),
            peak
        );
    }

    match client.read_user_data().await {
        Ok(record) => println!("user data {:?}", record),
        Err(e) => log::warn!("User data unavailable: {}", e),
    }

    let stats = client.statistics();
    println!(
        "readings {} (dropped {:.1}%), retries {}, link losses {}",
        stats.readings_delivered,
        stats.drop_rate(),
        stats.retries,
        stats.link_losses
    );

    client.disconnect().await;
    Ok(())
}
