//! # Capture Pipeline
//!
//! Turns live microphone input into a steady stream of outbound PCM16 frames.
//!
//! ## Flow:
//! 1. A worker thread builds the audio source (device handles are not `Send`)
//! 2. The source delivers fixed-size blocks of normalized samples
//! 3. Each block is clamped, encoded to PCM16 little-endian, stamped with a
//!    sequence number, and sent down the frame channel in block order
//! 4. If the channel is closed the frame is silently discarded; capture keeps
//!    running so a reconnect picks up mid-stream without device churn
//!
//! `stop()` is idempotent, safe before `start()`, and joins the worker, so no
//! frame is transmitted after it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::audio::codec;
use crate::audio::device::{DeviceSpec, SourceFactory};
use crate::audio::AudioFrame;
use crate::error::AppError;

/// Lifecycle notifications for the owner (the client state machine).
#[derive(Debug)]
pub enum CaptureEvent {
    /// The device is open and blocks are flowing
    Started,
    /// The device has been released
    Stopped,
    /// The device could not be opened or failed mid-capture
    Failed(AppError),
}

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// One microphone owner per session.
pub struct CapturePipeline {
    worker: Option<CaptureWorker>,
    produced: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
}

impl CapturePipeline {
    pub fn new() -> Self {
        Self {
            worker: None,
            produced: Arc::new(AtomicU64::new(0)),
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the device and start producing frames.
    ///
    /// ## Parameters:
    /// - **factory**: builds the source on the worker thread
    /// - **spec**: sample rate / channels / block size for the device
    /// - **frames**: where encoded frames go, in production order
    /// - **events**: lifecycle notifications (`Started`, `Stopped`, `Failed`)
    ///
    /// Calling start while already capturing is a no-op; one pipeline owns at
    /// most one device.
    pub fn start(
        &mut self,
        factory: SourceFactory,
        spec: DeviceSpec,
        frames: UnboundedSender<AudioFrame>,
        events: UnboundedSender<CaptureEvent>,
    ) {
        if self.worker.is_some() {
            debug!("capture already running, ignoring start");
            return;
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let produced = self.produced.clone();
        let sent = self.sent.clone();

        let handle = std::thread::spawn(move || {
            let mut source = match factory() {
                Ok(source) => source,
                Err(err) => {
                    warn!("capture source unavailable: {}", err);
                    let _ = events.send(CaptureEvent::Failed(err));
                    return;
                }
            };

            let seq = Arc::new(AtomicU64::new(0));
            let on_block = {
                let seq = seq.clone();
                let produced = produced.clone();
                let sent = sent.clone();
                let frames = frames.clone();
                Box::new(move |block: Vec<f32>| {
                    let data = codec::encode_pcm16(&block);
                    let frame = AudioFrame::capture(seq.fetch_add(1, Ordering::SeqCst), data);
                    produced.fetch_add(1, Ordering::SeqCst);
                    // A closed channel means nobody is listening right now;
                    // keep capturing and drop the frame on the floor
                    if frames.send(frame).is_ok() {
                        sent.fetch_add(1, Ordering::SeqCst);
                    }
                })
            };

            if let Err(err) = source.start(&spec, on_block) {
                warn!("failed to start capture: {}", err);
                let _ = events.send(CaptureEvent::Failed(err));
                return;
            }

            info!(
                sample_rate = spec.sample_rate,
                block_size = spec.block_size,
                "capture started"
            );
            let _ = events.send(CaptureEvent::Started);

            // Park until stop() is called or the pipeline is dropped
            let _ = stop_rx.recv();

            source.stop();
            let _ = events.send(CaptureEvent::Stopped);
        });

        self.worker = Some(CaptureWorker { stop_tx, handle });
    }

    /// Release the device and disconnect the processing graph.
    ///
    /// Safe to call repeatedly and before any `start()`; by the time it
    /// returns the source has been stopped on its own thread.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                warn!("capture worker panicked during shutdown");
            }
            info!(
                produced = self.produced.load(Ordering::SeqCst),
                sent = self.sent.load(Ordering::SeqCst),
                "capture stopped"
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Blocks encoded so far (including any dropped on a closed channel).
    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    /// Frames actually handed to the channel.
    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Default for CapturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{AudioSource, BlockCallback};
    use crate::audio::FrameDirection;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    /// Shared handle that lets a test push blocks as if a device produced
    /// them, honoring the active flag the way a paused stream would.
    #[derive(Clone)]
    struct FakeMic(Arc<FakeMicShared>);

    struct FakeMicShared {
        callback: Mutex<Option<BlockCallback>>,
        active: AtomicBool,
    }

    impl FakeMic {
        fn new() -> Self {
            Self(Arc::new(FakeMicShared {
                callback: Mutex::new(None),
                active: AtomicBool::new(false),
            }))
        }

        /// Returns false when capture is stopped, like a paused device.
        fn push_block(&self, block: Vec<f32>) -> bool {
            if !self.0.active.load(Ordering::SeqCst) {
                return false;
            }
            let mut callback = self.0.callback.lock().unwrap();
            match callback.as_mut() {
                Some(cb) => {
                    cb(block);
                    true
                }
                None => false,
            }
        }
    }

    struct FakeSource(FakeMic);

    impl AudioSource for FakeSource {
        fn start(&mut self, _spec: &DeviceSpec, on_block: BlockCallback) -> crate::error::AppResult<()> {
            *self.0 .0.callback.lock().unwrap() = Some(on_block);
            self.0 .0.active.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.0 .0.active.store(false, Ordering::SeqCst);
            self.0 .0.callback.lock().unwrap().take();
        }
    }

    fn spec() -> DeviceSpec {
        DeviceSpec {
            sample_rate: 16_000,
            channels: 1,
            block_size: 4,
        }
    }

    fn start_with_fake(
        pipeline: &mut CapturePipeline,
        mic: &FakeMic,
    ) -> (
        tokio::sync::mpsc::UnboundedReceiver<AudioFrame>,
        tokio::sync::mpsc::UnboundedReceiver<CaptureEvent>,
    ) {
        let (frames_tx, frames_rx) = tokio::sync::mpsc::unbounded_channel();
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let mic = mic.clone();
        pipeline.start(
            Box::new(move || Ok(Box::new(FakeSource(mic)) as Box<dyn AudioSource>)),
            spec(),
            frames_tx,
            events_tx,
        );
        (frames_rx, events_rx)
    }

    async fn wait_started(events: &mut tokio::sync::mpsc::UnboundedReceiver<CaptureEvent>) {
        match events.recv().await {
            Some(CaptureEvent::Started) => {}
            other => panic!("expected Started, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blocks_transmitted_once_in_order() {
        let mic = FakeMic::new();
        let mut pipeline = CapturePipeline::new();
        let (mut frames, mut events) = start_with_fake(&mut pipeline, &mic);
        wait_started(&mut events).await;

        assert!(mic.push_block(vec![0.1, 0.2, 0.3, 0.4]));
        assert!(mic.push_block(vec![0.5, 0.5, 0.5, 0.5]));
        assert!(mic.push_block(vec![-0.5, -0.5, -0.5, -0.5]));

        for expected_seq in 0..3u64 {
            let frame = frames.recv().await.unwrap();
            assert_eq!(frame.direction(), FrameDirection::Capture);
            assert_eq!(frame.seq(), expected_seq);
            assert_eq!(frame.len(), 8); // 4 samples of 2 bytes
        }
        assert_eq!(pipeline.frames_sent(), 3);

        pipeline.stop();
        // After stop() returns the device refuses further blocks
        assert!(!mic.push_block(vec![0.0; 4]));
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_discards_silently() {
        let mic = FakeMic::new();
        let mut pipeline = CapturePipeline::new();
        let (frames, mut events) = start_with_fake(&mut pipeline, &mic);
        wait_started(&mut events).await;

        drop(frames);
        assert!(mic.push_block(vec![0.1; 4]));
        assert!(mic.push_block(vec![0.2; 4]));

        // Capture kept running and counted the blocks it could not deliver
        assert!(pipeline.is_active());
        assert_eq!(pipeline.frames_produced(), 2);
        assert_eq!(pipeline.frames_sent(), 0);

        pipeline.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_safe_before_start() {
        let mut pipeline = CapturePipeline::new();
        pipeline.stop(); // never started

        let mic = FakeMic::new();
        let (_frames, mut events) = start_with_fake(&mut pipeline, &mic);
        wait_started(&mut events).await;

        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_active());

        match events.recv().await {
            Some(CaptureEvent::Stopped) => {}
            other => panic!("expected Stopped, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_device_failure_reports_event() {
        let mut pipeline = CapturePipeline::new();
        let (frames_tx, _frames_rx) = tokio::sync::mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();

        pipeline.start(
            Box::new(|| {
                Err(crate::error::AppError::DeviceAccess(
                    "microphone permission refused".to_string(),
                ))
            }),
            spec(),
            frames_tx,
            events_tx,
        );

        match events_rx.recv().await {
            Some(CaptureEvent::Failed(AppError::DeviceAccess(_))) => {}
            other => panic!("expected DeviceAccess failure, got {:?}", other),
        }
    }
}
