//! # Playback Pipeline
//!
//! Renders inbound audio frames as continuous output: one FIFO queue, one
//! rendering pass, and a hard wait for each frame to finish before the next
//! one starts. That sequential wait is the invariant that prevents overlapped
//! or out-of-order audio.
//!
//! ## Rendering pass:
//! A worker thread (created lazily with the sink on the first frame) pops the
//! head frame, decodes PCM16 to f32, hands it to the sink, and blocks until
//! the sink reports completion. When the queue drains the pass goes idle and
//! the owner is notified that speaking ended; a frame arriving first simply
//! keeps the pass alive.
//!
//! A frame that fails to decode is skipped and counted; it never blocks the
//! frames behind it. `flush()` drops everything still queued (the frame
//! currently rendering finishes naturally), which is how a backend
//! interruption cuts the assistant off.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::audio::codec;
use crate::audio::device::SinkFactory;
use crate::audio::AudioFrame;
use crate::error::AppError;

/// Notifications for the owner (the client state machine).
#[derive(Debug)]
pub enum PlaybackEvent {
    /// A rendering pass began; the assistant is audibly speaking
    Started,
    /// The queue drained and the pass went idle
    Drained,
    /// The output device could not be opened; the pipeline is dead
    Failed(AppError),
}

struct Shared {
    queue: Mutex<VecDeque<AudioFrame>>,
    available: Condvar,
    rendering: AtomicBool,
    running: AtomicBool,
    decode_failures: AtomicU64,
    frames_rendered: AtomicU64,
    frames_flushed: AtomicU64,
}

/// One output device owner per session. The device is created lazily on the
/// first frame and torn down with `close()` (or drop), never shared across
/// sessions.
pub struct PlaybackPipeline {
    shared: Arc<Shared>,
    worker: Option<Worker>,
    sink_factory: Option<SinkFactory>,
    sample_rate: u32,
    events: UnboundedSender<PlaybackEvent>,
}

impl PlaybackPipeline {
    pub fn new(
        sink_factory: SinkFactory,
        sample_rate: u32,
        events: UnboundedSender<PlaybackEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                rendering: AtomicBool::new(false),
                running: AtomicBool::new(true),
                decode_failures: AtomicU64::new(0),
                frames_rendered: AtomicU64::new(0),
                frames_flushed: AtomicU64::new(0),
            }),
            worker: None,
            sink_factory: Some(sink_factory),
            sample_rate,
            events,
        }
    }

    /// Append a frame at the tail; starts the rendering pass if idle.
    pub fn enqueue(&mut self, frame: AudioFrame) {
        if !self.shared.running.load(Ordering::SeqCst) {
            debug!(seq = frame.seq(), "playback closed, dropping frame");
            return;
        }

        self.ensure_worker();

        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(frame);
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Drop all frames not yet rendering. The frame currently playing (if
    /// any) completes; the pass then drains as usual.
    pub fn flush(&self) -> usize {
        let mut queue = self.shared.queue.lock().unwrap();
        let dropped = queue.len();
        queue.clear();
        drop(queue);

        if dropped > 0 {
            self.shared
                .frames_flushed
                .fetch_add(dropped as u64, Ordering::SeqCst);
            info!(dropped, "flushed playback queue");
        }
        dropped
    }

    /// Tear down the queue, the rendering pass, and the output device.
    /// Idempotent; waits for the frame currently rendering to finish.
    pub fn close(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.clear();
        }
        self.shared.available.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.handle.join().is_err() {
                warn!("playback worker panicked during shutdown");
            }
        }
        self.sink_factory = None;
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.rendering.load(Ordering::SeqCst)
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn decode_failures(&self) -> u64 {
        self.shared.decode_failures.load(Ordering::SeqCst)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::SeqCst)
    }

    pub fn frames_flushed(&self) -> u64 {
        self.shared.frames_flushed.load(Ordering::SeqCst)
    }

    /// Spawn the render worker and build the sink on it, once.
    fn ensure_worker(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let factory = match self.sink_factory.take() {
            Some(factory) => factory,
            None => return,
        };

        let shared = self.shared.clone();
        let events = self.events.clone();
        let sample_rate = self.sample_rate;

        let handle = std::thread::spawn(move || {
            let mut sink = match factory() {
                Ok(sink) => sink,
                Err(err) => {
                    warn!("playback sink unavailable: {}", err);
                    shared.running.store(false, Ordering::SeqCst);
                    shared.queue.lock().unwrap().clear();
                    let _ = events.send(PlaybackEvent::Failed(err));
                    return;
                }
            };

            loop {
                let frame = {
                    let mut queue = shared.queue.lock().unwrap();
                    loop {
                        if !shared.running.load(Ordering::SeqCst) {
                            shared.rendering.store(false, Ordering::SeqCst);
                            return;
                        }
                        if let Some(frame) = queue.pop_front() {
                            break frame;
                        }
                        // Idle boundary: the pass that was running has drained
                        if shared.rendering.swap(false, Ordering::SeqCst) {
                            let _ = events.send(PlaybackEvent::Drained);
                        }
                        queue = shared.available.wait(queue).unwrap();
                    }
                };

                if !shared.rendering.swap(true, Ordering::SeqCst) {
                    let _ = events.send(PlaybackEvent::Started);
                }

                match codec::decode_pcm16(frame.data()) {
                    Ok(samples) => {
                        if let Err(err) = sink.play(&samples, sample_rate) {
                            warn!(seq = frame.seq(), "playback failed: {}", err);
                        } else {
                            shared.frames_rendered.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    Err(err) => {
                        // Skip-and-continue: a bad frame never blocks the rest
                        shared.decode_failures.fetch_add(1, Ordering::SeqCst);
                        warn!(seq = frame.seq(), "skipping undecodable frame: {}", err);
                    }
                }
            }
        });

        self.worker = Some(Worker { handle });
    }
}

struct Worker {
    handle: JoinHandle<()>,
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
