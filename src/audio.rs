//! Audio Thread Boundary
//!
//! Audio pins are the only values that cross threads. An audio-bearing object
//! owns an [`AudioExchange`], a lock-free double buffer: the writer builds a
//! complete [`AudioBuffer`] and swaps it in atomically, the reader loads
//! whichever buffer was published last. Neither side ever observes a buffer
//! that is still being written.

use crate::graph::ObjectId;
use crate::object::Liveness;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic f64 for lock-free communication between threads
///
/// Stored as bits in an `AtomicU64`.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Interleaved block of samples, cheap to clone
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16) -> Self {
        Self {
            samples: Arc::from(samples),
            channels: channels.max(1),
        }
    }

    pub fn silent(frames: usize, channels: u16) -> Self {
        let channels = channels.max(1);
        Self::new(vec![0.0; frames * channels as usize], channels)
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 1)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Absolute peak over all channels
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

/// Lock-free handoff of audio buffers between the audio callback and the
/// frame loop
#[derive(Debug)]
pub struct AudioExchange {
    slot: ArcSwap<AudioBuffer>,
    published: AtomicU64,
}

impl AudioExchange {
    pub fn new() -> Self {
        Self {
            slot: ArcSwap::from_pointee(AudioBuffer::empty()),
            published: AtomicU64::new(0),
        }
    }

    /// Swap in a fully written buffer
    pub fn publish(&self, buffer: AudioBuffer) {
        self.slot.store(Arc::new(buffer));
        self.published.fetch_add(1, Ordering::Release);
    }

    /// The most recently published buffer
    pub fn latest(&self) -> AudioBuffer {
        AudioBuffer::clone(&self.slot.load())
    }

    /// Number of buffers published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

impl Default for AudioExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry points the audio engine calls from its real-time callback
///
/// Implementations must only touch lock-free state such as an
/// [`AudioExchange`].
pub trait AudioEndpoint: Send + Sync {
    /// Hand captured input samples to the object
    fn audio_in(&self, _buffer: &[f32]) {}

    /// Fill an output buffer from the object
    fn audio_out(&self, buffer: &mut [f32]) {
        buffer.fill(0.0);
    }

    fn channels(&self) -> u16 {
        1
    }
}

/// Endpoint for objects that receive audio from the device
pub struct CaptureEndpoint {
    exchange: Arc<AudioExchange>,
    peak: Arc<AtomicF64>,
    channels: u16,
}

impl CaptureEndpoint {
    pub fn new(exchange: Arc<AudioExchange>, peak: Arc<AtomicF64>, channels: u16) -> Self {
        Self {
            exchange,
            peak,
            channels,
        }
    }
}

impl AudioEndpoint for CaptureEndpoint {
    fn audio_in(&self, buffer: &[f32]) {
        let block = AudioBuffer::new(buffer.to_vec(), self.channels);
        self.peak.set(block.peak() as f64);
        self.exchange.publish(block);
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// Endpoint for objects that send audio to the device
pub struct PlaybackEndpoint {
    exchange: Arc<AudioExchange>,
    channels: u16,
}

impl PlaybackEndpoint {
    pub fn new(exchange: Arc<AudioExchange>, channels: u16) -> Self {
        Self { exchange, channels }
    }
}

impl AudioEndpoint for PlaybackEndpoint {
    fn audio_out(&self, buffer: &mut [f32]) {
        let latest = self.exchange.latest();
        let samples = latest.samples();
        let n = samples.len().min(buffer.len());
        buffer[..n].copy_from_slice(&samples[..n]);
        buffer[n..].fill(0.0);
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// An object's audio endpoint as handed to the audio engine
///
/// Calls become no-ops (silence on output) once the owning object has been
/// erased from its patch.
#[derive(Clone)]
pub struct EndpointHandle {
    object: ObjectId,
    endpoint: Arc<dyn AudioEndpoint>,
    liveness: Liveness,
}

impl EndpointHandle {
    pub(crate) fn new(object: ObjectId, endpoint: Arc<dyn AudioEndpoint>, liveness: Liveness) -> Self {
        Self {
            object,
            endpoint,
            liveness,
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn channels(&self) -> u16 {
        self.endpoint.channels()
    }

    pub fn audio_in(&self, buffer: &[f32]) {
        if self.liveness.is_alive() {
            self.endpoint.audio_in(buffer);
        }
    }

    pub fn audio_out(&self, buffer: &mut [f32]) {
        if self.liveness.is_alive() {
            self.endpoint.audio_out(buffer);
        } else {
            buffer.fill(0.0);
        }
    }
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("object", &self.object)
            .field("alive", &self.is_alive())
            .finish()
    }
}
