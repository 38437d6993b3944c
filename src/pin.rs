//! Pins and Payloads
//!
//! This module defines the closed set of pin kinds, the tagged payload that
//! travels along links, and the per-object pin declaration that is fixed for
//! the lifetime of an object.

use crate::audio::AudioBuffer;
use crate::object::ObjectFault;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Position of a pin within its object's inlet or outlet list
pub type PinIndex = usize;

/// Payload classification of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinKind {
    /// Single floating point value (also used for bangs)
    Numeric,

    /// UTF-8 text
    String,

    /// Ordered sequence of floats
    Array,

    /// Opaque GPU texture handle
    Texture,

    /// Block of audio samples, the only kind that crosses threads
    Audio,

    /// CPU side image buffer
    Pixels,
}

impl PinKind {
    /// All pin kinds, in declaration order
    pub const ALL: [PinKind; 6] = [
        PinKind::Numeric,
        PinKind::String,
        PinKind::Array,
        PinKind::Texture,
        PinKind::Audio,
        PinKind::Pixels,
    ];

    /// The "no value" sentinel for this kind
    pub fn empty_value(&self) -> PinValue {
        PinValue::empty(*self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PinKind::Numeric => "numeric",
            PinKind::String => "string",
            PinKind::Array => "array",
            PinKind::Texture => "texture",
            PinKind::Audio => "audio",
            PinKind::Pixels => "pixels",
        }
    }

    /// Whether values of this kind may be produced on the audio thread
    pub fn crosses_threads(&self) -> bool {
        matches!(self, PinKind::Audio)
    }
}

impl std::fmt::Display for PinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of a pin relative to its object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Inlet,
    Outlet,
}

impl std::fmt::Display for PinDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinDirection::Inlet => f.write_str("inlet"),
            PinDirection::Outlet => f.write_str("outlet"),
        }
    }
}

/// Handle to a texture owned by the rendering collaborator
///
/// The zero handle is the null texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureHandle(pub u64);

impl TextureHandle {
    pub const NULL: TextureHandle = TextureHandle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// CPU image buffer, cheap to clone
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Arc<[u8]>,
}

impl PixelBuffer {
    /// Wrap raw pixel data. Returns `None` when `data` does not hold exactly
    /// `width * height * channels` bytes.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data: Arc::from(data),
        })
    }

    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            channels: 0,
            data: Arc::from(Vec::new()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for PixelBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

/// A value carried by a pin, tagged with its kind
#[derive(Debug, Clone, PartialEq)]
pub enum PinValue {
    Numeric(f64),
    String(String),
    Array(Vec<f32>),
    Texture(TextureHandle),
    Audio(AudioBuffer),
    Pixels(PixelBuffer),
}

impl PinValue {
    /// The "no value" sentinel: zero or empty per kind
    pub fn empty(kind: PinKind) -> Self {
        match kind {
            PinKind::Numeric => PinValue::Numeric(0.0),
            PinKind::String => PinValue::String(String::new()),
            PinKind::Array => PinValue::Array(Vec::new()),
            PinKind::Texture => PinValue::Texture(TextureHandle::NULL),
            PinKind::Audio => PinValue::Audio(AudioBuffer::empty()),
            PinKind::Pixels => PinValue::Pixels(PixelBuffer::empty()),
        }
    }

    pub fn kind(&self) -> PinKind {
        match self {
            PinValue::Numeric(_) => PinKind::Numeric,
            PinValue::String(_) => PinKind::String,
            PinValue::Array(_) => PinKind::Array,
            PinValue::Texture(_) => PinKind::Texture,
            PinValue::Audio(_) => PinKind::Audio,
            PinValue::Pixels(_) => PinKind::Pixels,
        }
    }

    /// Whether this is the kind's sentinel value
    pub fn is_empty(&self) -> bool {
        match self {
            PinValue::Numeric(v) => *v == 0.0,
            PinValue::String(s) => s.is_empty(),
            PinValue::Array(a) => a.is_empty(),
            PinValue::Texture(t) => t.is_null(),
            PinValue::Audio(b) => b.is_empty(),
            PinValue::Pixels(p) => p.is_empty(),
        }
    }

    /// A bang is a momentary numeric value of at least 1.0
    pub fn is_bang(&self) -> bool {
        matches!(self, PinValue::Numeric(v) if *v >= 1.0)
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            PinValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PinValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f32]> {
        match self {
            PinValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<TextureHandle> {
        match self {
            PinValue::Texture(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioBuffer> {
        match self {
            PinValue::Audio(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_pixels(&self) -> Option<&PixelBuffer> {
        match self {
            PinValue::Pixels(p) => Some(p),
            _ => None,
        }
    }
}

impl From<f64> for PinValue {
    fn from(v: f64) -> Self {
        PinValue::Numeric(v)
    }
}

impl From<&str> for PinValue {
    fn from(s: &str) -> Self {
        PinValue::String(s.to_string())
    }
}

impl From<String> for PinValue {
    fn from(s: String) -> Self {
        PinValue::String(s)
    }
}

impl From<Vec<f32>> for PinValue {
    fn from(a: Vec<f32>) -> Self {
        PinValue::Array(a)
    }
}

impl From<TextureHandle> for PinValue {
    fn from(t: TextureHandle) -> Self {
        PinValue::Texture(t)
    }
}

impl From<AudioBuffer> for PinValue {
    fn from(b: AudioBuffer) -> Self {
        PinValue::Audio(b)
    }
}

impl From<PixelBuffer> for PinValue {
    fn from(p: PixelBuffer) -> Self {
        PinValue::Pixels(p)
    }
}

/// Declaration of a single inlet or outlet
#[derive(Debug, Clone, PartialEq)]
pub struct PinDef {
    /// Human-readable label (e.g., "left", "open", "out")
    pub label: String,

    /// Payload kind, fixed for the pin's lifetime
    pub kind: PinKind,

    /// For outlets: the value held before the first tick
    pub initial: PinValue,
}

impl PinDef {
    pub fn new(label: impl Into<String>, kind: PinKind) -> Self {
        Self {
            label: label.into(),
            kind,
            initial: PinValue::empty(kind),
        }
    }

    /// Set the initial value. Ignored (and flagged in debug builds) when
    /// the value's kind differs from the pin's.
    pub fn with_initial(mut self, value: impl Into<PinValue>) -> Self {
        let value = value.into();
        debug_assert_eq!(value.kind(), self.kind, "initial value kind mismatch");
        if value.kind() == self.kind {
            self.initial = value;
        }
        self
    }
}

/// Every inlet and outlet of an object, in index order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinSpec {
    pub inlets: Vec<PinDef>,
    pub outlets: Vec<PinDef>,
}

impl PinSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inlet(mut self, label: impl Into<String>, kind: PinKind) -> Self {
        self.inlets.push(PinDef::new(label, kind));
        self
    }

    pub fn outlet(mut self, label: impl Into<String>, kind: PinKind) -> Self {
        self.outlets.push(PinDef::new(label, kind));
        self
    }

    /// Declare an outlet holding `initial` until the object first writes it
    pub fn outlet_with(mut self, label: impl Into<String>, initial: impl Into<PinValue>) -> Self {
        let initial = initial.into();
        self.outlets
            .push(PinDef::new(label, initial.kind()).with_initial(initial));
        self
    }

    pub fn inlet_kind(&self, index: PinIndex) -> Option<PinKind> {
        self.inlets.get(index).map(|p| p.kind)
    }

    pub fn outlet_kind(&self, index: PinIndex) -> Option<PinKind> {
        self.outlets.get(index).map(|p| p.kind)
    }

    pub fn inlet_by_label(&self, label: &str) -> Option<PinIndex> {
        self.inlets.iter().position(|p| p.label == label)
    }

    pub fn outlet_by_label(&self, label: &str) -> Option<PinIndex> {
        self.outlets.iter().position(|p| p.label == label)
    }
}

/// Inlet values delivered to an object for the current frame
#[derive(Debug, Clone, Default)]
pub struct Inlets {
    values: Vec<PinValue>,
    connected: Vec<bool>,
}

impl Inlets {
    pub(crate) fn from_spec(spec: &PinSpec) -> Self {
        Self {
            values: spec.inlets.iter().map(|p| PinValue::empty(p.kind)).collect(),
            connected: vec![false; spec.inlets.len()],
        }
    }

    /// Return every inlet to its sentinel and mark it unconnected
    pub(crate) fn reset(&mut self) {
        for (value, connected) in self.values.iter_mut().zip(self.connected.iter_mut()) {
            if *connected || !value.is_empty() {
                *value = PinValue::empty(value.kind());
            }
            *connected = false;
        }
    }

    /// Deliver a value along an enabled link. Values of the wrong kind
    /// are refused.
    pub(crate) fn deliver(&mut self, index: PinIndex, value: PinValue) -> bool {
        match self.values.get_mut(index) {
            Some(slot) if slot.kind() == value.kind() => {
                *slot = value;
                self.connected[index] = true;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: PinIndex) -> Option<&PinValue> {
        self.values.get(index)
    }

    /// Whether an enabled link fed this inlet for the current frame
    pub fn is_connected(&self, index: PinIndex) -> bool {
        self.connected.get(index).copied().unwrap_or(false)
    }

    pub(crate) fn connected_flags(&self) -> &[bool] {
        &self.connected
    }

    pub fn numeric(&self, index: PinIndex) -> f64 {
        self.get(index).and_then(PinValue::as_numeric).unwrap_or(0.0)
    }

    /// The inlet value when wired, `default` otherwise
    pub fn numeric_or(&self, index: PinIndex, default: f64) -> f64 {
        if self.is_connected(index) {
            self.numeric(index)
        } else {
            default
        }
    }

    pub fn string(&self, index: PinIndex) -> &str {
        self.get(index).and_then(PinValue::as_str).unwrap_or("")
    }

    pub fn array(&self, index: PinIndex) -> &[f32] {
        self.get(index).and_then(PinValue::as_array).unwrap_or(&[])
    }

    pub fn texture(&self, index: PinIndex) -> TextureHandle {
        self.get(index)
            .and_then(PinValue::as_texture)
            .unwrap_or(TextureHandle::NULL)
    }

    pub fn audio(&self, index: PinIndex) -> Option<&AudioBuffer> {
        self.get(index).and_then(PinValue::as_audio)
    }

    pub fn pixels(&self, index: PinIndex) -> Option<&PixelBuffer> {
        self.get(index).and_then(PinValue::as_pixels)
    }

    pub fn is_bang(&self, index: PinIndex) -> bool {
        self.get(index).map(PinValue::is_bang).unwrap_or(false)
    }
}

/// Outlet values an object writes during its tick
#[derive(Debug, Clone, Default)]
pub struct Outlets {
    values: Vec<PinValue>,
}

impl Outlets {
    pub(crate) fn from_spec(spec: &PinSpec) -> Self {
        Self {
            values: spec.outlets.iter().map(|p| p.initial.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: PinIndex) -> Option<&PinValue> {
        self.values.get(index)
    }

    /// Write an outlet. Writing a value of the wrong kind, or to an
    /// undeclared outlet, is an object fault.
    pub fn set(&mut self, index: PinIndex, value: impl Into<PinValue>) -> Result<(), ObjectFault> {
        let value = value.into();
        match self.values.get_mut(index) {
            Some(slot) if slot.kind() == value.kind() => {
                *slot = value;
                Ok(())
            }
            Some(slot) => Err(ObjectFault::new(format!(
                "outlet {} expects {} but was given {}",
                index,
                slot.kind(),
                value.kind()
            ))),
            None => Err(ObjectFault::new(format!("outlet {} is not declared", index))),
        }
    }

    pub fn numeric(&self, index: PinIndex) -> f64 {
        self.get(index).and_then(PinValue::as_numeric).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_match_kind() {
        for kind in PinKind::ALL {
            let value = kind.empty_value();
            assert_eq!(value.kind(), kind);
            assert!(value.is_empty());
        }
    }

    #[test]
    fn test_bang_threshold() {
        assert!(PinValue::Numeric(1.0).is_bang());
        assert!(PinValue::Numeric(3.5).is_bang());
        assert!(!PinValue::Numeric(0.99).is_bang());
        assert!(!PinValue::String("bang".into()).is_bang());
    }

    #[test]
    fn test_only_audio_crosses_threads() {
        let crossing: Vec<_> = PinKind::ALL
            .iter()
            .filter(|k| k.crosses_threads())
            .collect();
        assert_eq!(crossing, vec![&PinKind::Audio]);
    }

    #[test]
    fn test_pixel_buffer_size_check() {
        assert!(PixelBuffer::new(2, 2, 4, vec![0; 16]).is_some());
        assert!(PixelBuffer::new(2, 2, 4, vec![0; 15]).is_none());
        assert!(PixelBuffer::empty().is_empty());
    }

    #[test]
    fn test_pin_spec_builder_and_lookup() {
        let spec = PinSpec::new()
            .inlet("left", PinKind::Numeric)
            .inlet("right", PinKind::Numeric)
            .outlet_with("sum", 2.0)
            .outlet("text", PinKind::String);

        assert_eq!(spec.inlets.len(), 2);
        assert_eq!(spec.inlet_by_label("right"), Some(1));
        assert_eq!(spec.outlet_by_label("text"), Some(1));
        assert_eq!(spec.outlet_by_label("missing"), None);
        assert_eq!(spec.outlet_kind(0), Some(PinKind::Numeric));
        assert_eq!(spec.outlets[0].initial, PinValue::Numeric(2.0));
        assert_eq!(spec.inlet_kind(7), None);
    }

    #[test]
    fn test_inlets_sentinel_and_delivery() {
        let spec = PinSpec::new()
            .inlet("a", PinKind::Numeric)
            .inlet("b", PinKind::String);
        let mut inlets = Inlets::from_spec(&spec);

        assert_eq!(inlets.numeric(0), 0.0);
        assert_eq!(inlets.string(1), "");
        assert!(!inlets.is_connected(0));
        assert_eq!(inlets.numeric_or(0, 7.0), 7.0);

        assert!(inlets.deliver(0, PinValue::Numeric(4.0)));
        assert!(!inlets.deliver(1, PinValue::Numeric(4.0)));
        assert!(!inlets.deliver(9, PinValue::Numeric(4.0)));
        assert!(inlets.is_connected(0));
        assert!(!inlets.is_connected(1));
        assert_eq!(inlets.numeric_or(0, 7.0), 4.0);

        inlets.reset();
        assert!(!inlets.is_connected(0));
        assert_eq!(inlets.numeric(0), 0.0);
    }

    #[test]
    fn test_outlets_reject_wrong_kind() {
        let spec = PinSpec::new().outlet("out", PinKind::Array);
        let mut outlets = Outlets::from_spec(&spec);

        assert!(outlets.set(0, vec![1.0f32, 2.0]).is_ok());
        assert!(outlets.set(0, 1.0).is_err());
        assert!(outlets.set(3, vec![1.0f32]).is_err());
        assert_eq!(outlets.get(0), Some(&PinValue::Array(vec![1.0, 2.0])));
    }

    #[test]
    fn test_out_of_range_reads_are_sentinels() {
        let inlets = Inlets::default();
        assert_eq!(inlets.numeric(3), 0.0);
        assert_eq!(inlets.array(3), &[] as &[f32]);
        assert!(inlets.texture(3).is_null());
        assert!(inlets.audio(3).is_none());
        assert!(!inlets.is_bang(3));
    }
}
