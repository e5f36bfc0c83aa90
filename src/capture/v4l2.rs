//! V4L2 capture session streaming through memory-mapped buffers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::session::{CaptureSession, FrameSink};
use crate::error::SessionError;
use crate::CaptureConfig;

/// Drives a V4L2 device from a dedicated capture thread.
///
/// The device is opened on that thread and never leaves it. Timestamps are
/// the driver's capture time in milliseconds.
pub struct V4l2Session {
    config: CaptureConfig,
    budget_bytes: u64,
    stop_flag: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Session {
    pub fn new(config: CaptureConfig, budget_bytes: u64) -> Self {
        Self {
            config,
            budget_bytes,
            stop_flag: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

fn fourcc(code: &str) -> Result<FourCC, SessionError> {
    let bytes: [u8; 4] = code
        .as_bytes()
        .try_into()
        .map_err(|_| SessionError::Device(format!("invalid fourcc {code:?}")))?;
    Ok(FourCC::new(&bytes))
}

fn open_device(config: &CaptureConfig) -> Result<Device, SessionError> {
    let device = Device::with_path(&config.device)?;

    let caps = device.query_caps()?;
    info!("Device: {} ({})", caps.card, caps.driver);
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(SessionError::Device(format!(
            "{} doesn't support video capture",
            config.device
        )));
    }

    let mut fmt = device.format()?;
    fmt.width = config.width;
    fmt.height = config.height;
    fmt.fourcc = fourcc(&config.fourcc)?;
    let fmt = device.set_format(&fmt)?;
    if fmt.width != config.width || fmt.height != config.height {
        warn!(
            width = fmt.width,
            height = fmt.height,
            "device adjusted the requested frame size"
        );
    }

    device.set_params(&Parameters::with_fps(config.fps))?;
    Ok(device)
}

impl CaptureSession for V4l2Session {
    fn buffer_budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), SessionError> {
        if self.worker.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        self.stop_flag.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);

        let config = self.config.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let finished = Arc::clone(&self.finished);
        let (ready_tx, ready_rx) = channel::bounded::<Result<(), SessionError>>(1);

        let worker = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                let device = match open_device(&config) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        finished.store(true, Ordering::Release);
                        return;
                    }
                };
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.into()));
                            finished.store(true, Ordering::Release);
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok(()));

                while !stop_flag.load(Ordering::Acquire) {
                    match stream.next() {
                        Ok((buf, meta)) => {
                            let timestamp = (meta.timestamp.sec as u64) * 1000
                                + (meta.timestamp.usec as u64) / 1000;
                            sink(buf, meta.bytesused as usize, timestamp);
                        }
                        Err(e) => {
                            warn!("V4L2 dequeue failed: {}", e);
                            break;
                        }
                    }
                }
                finished.store(true, Ordering::Release);
            })
            .map_err(SessionError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(SessionError::ThreadPanicked);
            }
        }

        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.stop_flag.store(true, Ordering::Release);
        // The thread notices the flag after its current dequeue returns
        worker.join().map_err(|_| SessionError::ThreadPanicked)?;
        info!("V4L2 capture stopped");
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl Drop for V4l2Session {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
