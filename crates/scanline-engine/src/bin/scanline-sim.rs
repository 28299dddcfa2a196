//! # scanline-sim
//!
//! Drives a `ScannerController` against simulated cameras so the whole
//! pipeline (capture, decode, gate, history, feedback) can be exercised
//! without hardware.
//!
//! ```text
//! scanline-sim [CODE ...]
//!
//! RUST_LOG=scanline=trace scanline-sim 12-34-56 987654321
//! SCANLINE_DB_PATH=/tmp/scanline.db scanline-sim
//! ```
//!
//! Each argument is shown to the rear camera as one frame. Without
//! arguments a short demo script runs, including a duplicate, an invalid
//! code, and a switch to the front camera.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scanline_core::CaptureDevice;
use scanline_engine::sim::{RecordingAudio, ScriptedDecoder, SimulatedCamera};
use scanline_engine::{ScannerConfig, ScannerControllerBuilder};
use scanline_store::{SqliteStore, StoreConfig};

/// Gap between simulated frames.
const FRAME_INTERVAL: Duration = Duration::from_millis(120);

const DEMO_SCRIPT: &[&str] = &["12-34-56", "12-34-56", "ABC123", "", "987654321"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = ScannerConfig::load_or_default(None);
    let store = open_store(&config).await?;

    let camera = Arc::new(SimulatedCamera::new(vec![
        CaptureDevice::new("sim-rear", "Back Camera"),
        CaptureDevice::new("sim-front", "Front Camera"),
    ]));
    let audio = Arc::new(RecordingAudio::new());

    let controller = ScannerControllerBuilder::new(config)
        .with_provider(camera.clone())
        .with_decoder(Arc::new(ScriptedDecoder::new()))
        .with_store(store.clone())
        .with_audio(audio.clone())
        .build()
        .await?;

    let mut scans = controller.subscribe_scans();
    let printer = tokio::spawn(async move {
        while let Ok(scan) = scans.recv().await {
            println!("scanned {} ({})", scan.code, scan.symbology);
        }
    });

    let state = controller.initialize().await?;
    info!(devices = state.available_devices.len(), selected = ?state.selected_device, "Initialized");

    controller.start(None).await?;

    let codes: Vec<String> = std::env::args().skip(1).collect();
    if codes.is_empty() {
        show(&camera, DEMO_SCRIPT.iter().copied()).await;
        controller.switch_device("sim-front".into()).await?;
        show(&camera, ["555555"]).await;
    } else {
        show(&camera, codes.iter().map(String::as_str)).await;
    }

    controller.stop().await?;

    println!("history (newest first):");
    for entry in controller.history().list().await {
        println!("  {}  {}  {}", entry.observed_at.to_rfc3339(), entry.code, entry.symbology);
    }
    println!("tones played: {}", audio.tones().len());

    controller.dispose().await?;
    drop(controller);
    if let Err(e) = printer.await {
        warn!(error = %e, "Scan printer failed");
    }
    store.close().await;

    Ok(())
}

async fn show<'a>(camera: &SimulatedCamera, payloads: impl IntoIterator<Item = &'a str>) {
    for payload in payloads {
        if !camera.push_frame(payload) {
            warn!(payload, "Frame dropped");
        }
        tokio::time::sleep(FRAME_INTERVAL).await;
    }
}

/// Opens the configured SQLite file, falling back to an in-memory store.
async fn open_store(config: &ScannerConfig) -> Result<Arc<SqliteStore>, Box<dyn std::error::Error>> {
    if let Some(path) = config.database_path() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match SqliteStore::new(StoreConfig::new(&path)).await {
            Ok(store) => {
                info!(path = %path.display(), "History store opened");
                return Ok(Arc::new(store));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Falling back to in-memory history"),
        }
    }
    Ok(Arc::new(SqliteStore::new(StoreConfig::in_memory()).await?))
}

/// `RUST_LOG` wins; otherwise info, with debug for scanline crates.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scanline=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
