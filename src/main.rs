//! framebridge: capture frames from a session and drain them like a demuxer would

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};

use framebridge::capture::{Capture, ReadOutcome, SyntheticSession};
use framebridge::{Config, SourceKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framebridge=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("framebridge launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    framebridge::CONFIG.store(Arc::new(config));
    let config = framebridge::CONFIG.load_full();

    let capture = Arc::new(open_capture(&config)?);

    // Consumer: the pull side, on a blocking thread
    let consumer = {
        let capture = Arc::clone(&capture);
        let config = Arc::clone(&config);
        tokio::task::spawn_blocking(move || consume(&capture, &config))
    };

    // Stop on Ctrl-C, or once a bounded source has been drained
    let watcher = {
        let capture = Arc::clone(&capture);
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if capture.source_finished() && capture.bridge().queued_frames() == 0 {
                    break;
                }
            }
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Ctrl-C received");
        }
        _ = watcher => info!("capture source finished"),
    }

    capture.stop()?;
    let frames = consumer.await?;

    let stats = capture.stats();
    info!(
        frames,
        callbacks = stats.callbacks,
        dropped_policy = stats.dropped_policy,
        dropped_alloc = stats.dropped_alloc,
        discarded_on_stop = stats.discarded_on_stop,
        "framebridge shutting down"
    );
    Ok(())
}

fn open_capture(config: &Config) -> Result<Capture> {
    let budget = config.bridge.budget_bytes;
    let capture = match config.capture.source {
        SourceKind::Synthetic => Capture::open(SyntheticSession::new(&config.capture, budget))?,
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => Capture::open(framebridge::capture::V4l2Session::new(
            config.capture.clone(),
            budget,
        ))?,
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => color_eyre::eyre::bail!("built without the `v4l2` feature"),
    };
    Ok(capture)
}

/// Read frames until the capture stops. Returns the number of frames read.
fn consume(capture: &Capture, config: &Config) -> u64 {
    let mut frames = 0u64;
    let mut last_timestamp: Option<u64> = None;
    loop {
        let outcome = match config.bridge.read_timeout() {
            Some(timeout) => capture.read_next_frame_timeout(timeout),
            None => capture.read_next_frame(config.bridge.nonblocking),
        };
        match outcome {
            ReadOutcome::Frame(frame) => {
                frames += 1;
                if last_timestamp.is_some_and(|ts| frame.capture_timestamp() < ts) {
                    warn!(
                        timestamp = frame.capture_timestamp(),
                        "capture timestamp went backwards"
                    );
                }
                last_timestamp = Some(frame.capture_timestamp());
                if frames % 30 == 0 {
                    info!(
                        frames,
                        timestamp_ms = frame.capture_timestamp(),
                        size = frame.size_bytes(),
                        pending_bytes = capture.pending_bytes(),
                        "frame received"
                    );
                }
            }
            ReadOutcome::NoDataAvailable => std::thread::sleep(Duration::from_millis(5)),
            ReadOutcome::Stopped => break,
        }
    }
    frames
}
