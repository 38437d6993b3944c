//! Built-in Objects
//!
//! A small catalogue of patch objects: constants, arithmetic, control flow,
//! messages, arrays, audio endpoints and a deferred file reader. They are
//! registered by [`crate::ObjectRegistry::new`] and double as reference
//! implementations of [`PatchObject`].

use crate::audio::{
    AtomicF64, AudioBuffer, AudioEndpoint, AudioExchange, CaptureEndpoint, PlaybackEndpoint,
};
use crate::config::AudioSettings;
use crate::deferred::Deferred;
use crate::object::{CustomVars, ObjectFault, PatchObject, TickContext};
use crate::pin::{Inlets, Outlets, PinIndex, PinKind, PinSpec, PinValue};
use crate::render::DrawList;
use std::sync::Arc;

/// Outputs a fixed number
///
/// Custom variable `value` overrides the number.
pub struct Constant {
    value: f64,
}

impl Constant {
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Default for Constant {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl PatchObject for Constant {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new().outlet_with("out", self.value)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        _inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        outlets.set(0, self.value)
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.label(format!("{:.2}", self.value));
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "constant"
    }

    fn load_custom_vars(&mut self, vars: &CustomVars) {
        if let Some(value) = vars.float("value") {
            self.value = value;
        }
    }

    fn store_custom_vars(&self, vars: &mut CustomVars) {
        vars.set("value", self.value);
    }

    fn initial_outlets(&self) -> Vec<(PinIndex, PinValue)> {
        vec![(0, PinValue::Numeric(self.value))]
    }
}

/// Sum of two numbers
#[derive(Default)]
pub struct Add {
    last: f64,
}

impl Add {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatchObject for Add {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("left", PinKind::Numeric)
            .inlet("right", PinKind::Numeric)
            .outlet("sum", PinKind::Numeric)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        self.last = inlets.numeric(0) + inlets.numeric(1);
        outlets.set(0, self.last)
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.label(format!("+ {:.2}", self.last));
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "add"
    }

    fn reset(&mut self) {
        self.last = 0.0;
    }
}

/// Product of two numbers. An unwired right inlet counts as 1.
#[derive(Default)]
pub struct Multiply {
    last: f64,
}

impl Multiply {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatchObject for Multiply {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("left", PinKind::Numeric)
            .inlet("right", PinKind::Numeric)
            .outlet("product", PinKind::Numeric)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        self.last = inlets.numeric(0) * inlets.numeric_or(1, 1.0);
        outlets.set(0, self.last)
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.label(format!("* {:.2}", self.last));
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "multiply"
    }

    fn reset(&mut self) {
        self.last = 0.0;
    }
}

/// Emits a one-frame bang on each rising edge of its input
#[derive(Default)]
pub struct Bang {
    was_high: bool,
    fired: bool,
}

impl Bang {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatchObject for Bang {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("in", PinKind::Numeric)
            .outlet("bang", PinKind::Numeric)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        let high = inlets.is_bang(0);
        self.fired = high && !self.was_high;
        self.was_high = high;
        outlets.set(0, if self.fired { 1.0 } else { 0.0 })
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.rect(4.0, 4.0, 12.0, 12.0, self.fired);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "bang"
    }

    fn reset(&mut self) {
        self.was_high = false;
        self.fired = false;
    }
}

/// Counts bangs; a bang on the right inlet resets to zero
///
/// The count is kept in custom variable `count` so it survives a save.
#[derive(Default)]
pub struct Counter {
    count: f64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatchObject for Counter {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("bang", PinKind::Numeric)
            .inlet("reset", PinKind::Numeric)
            .outlet("count", PinKind::Numeric)
    }

    fn on_tick(
        &mut self,
        ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        let before = self.count;
        if inlets.is_bang(1) {
            self.count = 0.0;
        } else if inlets.is_bang(0) {
            self.count += 1.0;
        }
        if self.count != before {
            ctx.set_custom_var("count", self.count);
        }
        outlets.set(0, self.count)
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.label(format!("{}", self.count as i64));
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "counter"
    }

    fn load_custom_vars(&mut self, vars: &CustomVars) {
        if let Some(count) = vars.float("count") {
            self.count = count;
        }
    }

    fn store_custom_vars(&self, vars: &mut CustomVars) {
        vars.set("count", self.count);
    }

    fn reset(&mut self) {
        self.count = 0.0;
    }
}

/// One-pole smoothing of a number
///
/// Custom variable `factor` (0 to just below 1) sets how much of the previous
/// output is kept each frame.
pub struct Smooth {
    factor: f64,
    current: f64,
}

impl Smooth {
    pub fn new(factor: f64) -> Self {
        Self {
            factor: factor.clamp(0.0, 0.999),
            current: 0.0,
        }
    }
}

impl Default for Smooth {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl PatchObject for Smooth {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("in", PinKind::Numeric)
            .outlet("out", PinKind::Numeric)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        let target = inlets.numeric(0);
        self.current = self.current * self.factor + target * (1.0 - self.factor);
        outlets.set(0, self.current)
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.label(format!("{:.3}", self.current));
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "smooth"
    }

    fn load_custom_vars(&mut self, vars: &CustomVars) {
        if let Some(factor) = vars.float("factor") {
            self.factor = factor.clamp(0.0, 0.999);
        }
    }

    fn store_custom_vars(&self, vars: &mut CustomVars) {
        vars.set("factor", self.factor);
    }

    fn reset(&mut self) {
        self.current = 0.0;
    }
}

/// Routes one of several inputs of a single kind to its outlet
///
/// Inlet 0 selects: `1..=n` passes the matching input, anything else holds
/// the last routed value.
pub struct Gate {
    kind: PinKind,
    inputs: usize,
    selected: usize,
}

impl Gate {
    pub fn new(kind: PinKind, inputs: usize) -> Self {
        Self {
            kind,
            inputs: inputs.max(1),
            selected: 0,
        }
    }

    pub fn kind(&self) -> PinKind {
        self.kind
    }
}

impl PatchObject for Gate {
    fn declare_pins(&mut self) -> PinSpec {
        let mut spec = PinSpec::new().inlet("select", PinKind::Numeric);
        for i in 1..=self.inputs {
            spec = spec.inlet(format!("in {}", i), self.kind);
        }
        spec.outlet("out", self.kind)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        let select = inlets.numeric(0).round();
        self.selected = if select >= 1.0 && select <= self.inputs as f64 {
            select as usize
        } else {
            0
        };
        if self.selected == 0 {
            return Ok(());
        }
        match inlets.get(self.selected) {
            Some(value) => outlets.set(0, value.clone()),
            None => Ok(()),
        }
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        match self.selected {
            0 => draw.label("closed"),
            n => draw.label(format!("open {}", n)),
        }
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            PinKind::Numeric => "gate",
            PinKind::String => "string gate",
            PinKind::Array => "array gate",
            PinKind::Texture => "texture gate",
            PinKind::Audio => "audio gate",
            PinKind::Pixels => "pixels gate",
        }
    }

    fn reset(&mut self) {
        self.selected = 0;
    }
}

/// Passes a number through while the right inlet is non-zero
///
/// When closed the outlet reads as the empty sentinel.
#[derive(Default)]
pub struct Spigot {
    open: bool,
}

impl Spigot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatchObject for Spigot {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("in", PinKind::Numeric)
            .inlet("open", PinKind::Numeric)
            .outlet("out", PinKind::Numeric)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        self.open = inlets.numeric(1) != 0.0;
        let out = if self.open { inlets.numeric(0) } else { 0.0 };
        outlets.set(0, out)
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.rect(0.0, 0.0, 8.0, 8.0, self.open);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "spigot"
    }
}

/// Outputs a text message
///
/// With the bang inlet unwired the message is sent every frame; once wired,
/// only on frames that carry a bang. Custom variable `text` sets the message.
pub struct Message {
    text: String,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new("")
    }
}

impl PatchObject for Message {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("bang", PinKind::Numeric)
            .outlet_with("out", self.text.as_str())
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        if !inlets.is_connected(0) || inlets.is_bang(0) {
            outlets.set(0, self.text.as_str())
        } else {
            outlets.set(0, PinKind::String.empty_value())
        }
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.label(self.text.clone());
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "message"
    }

    fn load_custom_vars(&mut self, vars: &CustomVars) {
        if let Some(text) = vars.text("text") {
            self.text = text.to_string();
        }
    }

    fn store_custom_vars(&self, vars: &mut CustomVars) {
        vars.set("text", self.text.as_str());
    }

    fn initial_outlets(&self) -> Vec<(PinIndex, PinValue)> {
        vec![(0, PinValue::String(self.text.clone()))]
    }
}

/// Collects numeric inlets into an array
pub struct Pack {
    inputs: usize,
    packed: Vec<f32>,
}

impl Pack {
    pub fn new(inputs: usize) -> Self {
        Self {
            inputs: inputs.max(1),
            packed: Vec::new(),
        }
    }
}

impl Default for Pack {
    fn default() -> Self {
        Self::new(4)
    }
}

impl PatchObject for Pack {
    fn declare_pins(&mut self) -> PinSpec {
        let mut spec = PinSpec::new();
        for i in 1..=self.inputs {
            spec = spec.inlet(format!("in {}", i), PinKind::Numeric);
        }
        spec.outlet("array", PinKind::Array)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        self.packed.clear();
        self.packed
            .extend((0..self.inputs).map(|i| inlets.numeric(i) as f32));
        outlets.set(0, self.packed.clone())
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        let points = self
            .packed
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f32, *v))
            .collect();
        draw.plot(points);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "pack"
    }
}

/// Audio captured by the device, as an audio pin plus a peak level
pub struct AudioIn {
    exchange: Arc<AudioExchange>,
    peak: Arc<AtomicF64>,
    channels: u16,
    level: f64,
}

impl AudioIn {
    pub fn new(settings: &AudioSettings) -> Self {
        Self {
            exchange: Arc::new(AudioExchange::new()),
            peak: Arc::new(AtomicF64::default()),
            channels: settings.channels,
            level: 0.0,
        }
    }
}

impl Default for AudioIn {
    fn default() -> Self {
        Self::new(&AudioSettings::default())
    }
}

impl PatchObject for AudioIn {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .outlet("audio", PinKind::Audio)
            .outlet("level", PinKind::Numeric)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        _inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        self.level = self.peak.get();
        outlets.set(0, self.exchange.latest())?;
        outlets.set(1, self.level)
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.meter(self.level as f32);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "audio in"
    }

    fn audio_endpoint(&self) -> Option<Arc<dyn AudioEndpoint>> {
        Some(Arc::new(CaptureEndpoint::new(
            self.exchange.clone(),
            self.peak.clone(),
            self.channels,
        )))
    }
}

/// Sends its audio inlet to the device; silence when unwired
pub struct AudioOut {
    exchange: Arc<AudioExchange>,
    block_size: usize,
    channels: u16,
    level: f32,
}

impl AudioOut {
    pub fn new(settings: &AudioSettings) -> Self {
        Self {
            exchange: Arc::new(AudioExchange::new()),
            block_size: settings.block_size,
            channels: settings.channels,
            level: 0.0,
        }
    }
}

impl Default for AudioOut {
    fn default() -> Self {
        Self::new(&AudioSettings::default())
    }
}

impl PatchObject for AudioOut {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new().inlet("audio", PinKind::Audio)
    }

    fn on_tick(
        &mut self,
        _ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        _outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        let block = match inlets.audio(0) {
            Some(buffer) if inlets.is_connected(0) && !buffer.is_empty() => buffer.clone(),
            _ => AudioBuffer::silent(self.block_size, self.channels),
        };
        self.level = block.rms();
        self.exchange.publish(block);
        Ok(())
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        draw.meter(self.level);
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "audio out"
    }

    fn audio_endpoint(&self) -> Option<Arc<dyn AudioEndpoint>> {
        Some(Arc::new(PlaybackEndpoint::new(
            self.exchange.clone(),
            self.channels,
        )))
    }
}

/// Reads a text file off the frame thread
///
/// Custom variable `path` names the file. A rising bang on the inlet
/// (re)loads it unless a load is already running; the contents appear on the
/// outlet a few frames later. Read errors are reported as object faults.
#[derive(Default)]
pub struct TextFile {
    path: Option<String>,
    load: Option<Deferred<Result<String, String>>>,
    loaded: Option<usize>,
    was_high: bool,
}

impl TextFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    fn start(&mut self, ctx: &TickContext<'_>) -> Result<(), ObjectFault> {
        let Some(path) = self.path.clone() else {
            return Err(ObjectFault::new("no file path set"));
        };
        let load = Deferred::spawn(ctx.liveness(), move |_| {
            std::fs::read_to_string(&path).map_err(|e| format!("{}: {}", path, e))
        })
        .map_err(|e| ObjectFault::new(format!("cannot start file read: {}", e)))?;
        self.load = Some(load);
        Ok(())
    }
}

impl PatchObject for TextFile {
    fn declare_pins(&mut self) -> PinSpec {
        PinSpec::new()
            .inlet("load", PinKind::Numeric)
            .outlet("text", PinKind::String)
    }

    fn on_tick(
        &mut self,
        ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault> {
        let high = inlets.is_bang(0);
        let rising = high && !self.was_high;
        self.was_high = high;
        if rising && self.load.is_none() {
            self.start(ctx)?;
        }

        let Some(load) = self.load.as_mut() else {
            return Ok(());
        };
        match load.poll() {
            Some(Ok(text)) => {
                self.load = None;
                self.loaded = Some(text.len());
                outlets.set(0, text)
            }
            Some(Err(message)) => {
                self.load = None;
                Err(ObjectFault::new(message))
            }
            None => Ok(()),
        }
    }

    fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
        match (&self.load, self.loaded) {
            (Some(_), _) => draw.label("loading"),
            (None, Some(bytes)) => draw.label(format!("{} bytes", bytes)),
            (None, None) => draw.label(self.path.as_deref().unwrap_or("no file")),
        }
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        "text file"
    }

    fn load_custom_vars(&mut self, vars: &CustomVars) {
        if let Some(path) = vars.text("path") {
            self.path = Some(path.to_string());
        }
    }

    fn store_custom_vars(&self, vars: &mut CustomVars) {
        if let Some(path) = &self.path {
            vars.set("path", path.as_str());
        }
    }

    fn reset(&mut self) {
        self.load = None;
        self.loaded = None;
        self.was_high = false;
    }
}

#[cfg(test)]
pub(crate) use stub::Stub;

#[cfg(test)]
mod stub {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Test object with arbitrary pins that counts its ticks and can be told
    /// to start failing
    pub(crate) struct Stub {
        inlets: Vec<PinKind>,
        outlets: Vec<PinKind>,
        ticks: Arc<AtomicU64>,
        fail_after: Option<u64>,
    }

    impl Stub {
        pub(crate) fn new(inlets: &[PinKind], outlets: &[PinKind]) -> Self {
            Self {
                inlets: inlets.to_vec(),
                outlets: outlets.to_vec(),
                ticks: Arc::new(AtomicU64::new(0)),
                fail_after: None,
            }
        }

        /// Succeeds `n` times, then returns a fault from every tick
        pub(crate) fn failing_after(n: u64) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::new(&[], &[])
            }
        }

        pub(crate) fn ticks(&self) -> Arc<AtomicU64> {
            self.ticks.clone()
        }
    }

    impl PatchObject for Stub {
        fn declare_pins(&mut self) -> PinSpec {
            let mut spec = PinSpec::new();
            for (i, kind) in self.inlets.iter().enumerate() {
                spec = spec.inlet(format!("in {}", i), *kind);
            }
            for (i, kind) in self.outlets.iter().enumerate() {
                spec = spec.outlet(format!("out {}", i), *kind);
            }
            spec
        }

        fn on_tick(
            &mut self,
            _ctx: &mut TickContext<'_>,
            _inlets: &Inlets,
            _outlets: &mut Outlets,
        ) -> Result<(), ObjectFault> {
            let previous = self.ticks.fetch_add(1, Ordering::Relaxed);
            match self.fail_after {
                Some(n) if previous >= n => Err(ObjectFault::new("stub failure")),
                _ => Ok(()),
            }
        }

        fn render(&mut self, draw: &mut DrawList) -> Result<(), ObjectFault> {
            draw.label("stub");
            Ok(())
        }

        fn type_name(&self) -> &'static str {
            "stub"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TickEngine;
    use crate::graph::Patch;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_uses_custom_var() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(1.0));
        patch.set_custom_var(c, "value", 4.5);

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(c, 0), Some(&PinValue::Numeric(4.5)));
    }

    #[test]
    fn test_multiply_defaults_right_to_one() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(3.0));
        let m = patch.add_object("m", Multiply::new());
        patch.connect(c, 0, m, 0).unwrap();

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(m, 0), Some(&PinValue::Numeric(3.0)));
    }

    #[test]
    fn test_bang_fires_on_rising_edge_only() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(1.0));
        let bang = patch.add_object("bang", Bang::new());
        patch.connect(c, 0, bang, 0).unwrap();

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(bang, 0), Some(&PinValue::Numeric(1.0)));
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(bang, 0), Some(&PinValue::Numeric(0.0)));
    }

    #[test]
    fn test_counter_counts_bangs_and_persists() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(1.0));
        let counter = patch.add_object("counter", Counter::new());
        patch.connect(c, 0, counter, 0).unwrap();

        let mut engine = TickEngine::default();
        engine.run(&mut patch, 3);
        assert_eq!(patch.outlet_value(counter, 0), Some(&PinValue::Numeric(3.0)));
        assert_eq!(patch.custom_vars(counter).unwrap().float("count"), Some(3.0));

        // Reset wins over a simultaneous bang
        let one = patch.add_object("one", Constant::new(1.0));
        patch.connect(one, 0, counter, 1).unwrap();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(counter, 0), Some(&PinValue::Numeric(0.0)));
    }

    #[test]
    fn test_smooth_converges() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(10.0));
        let smooth = patch.add_object("smooth", Smooth::new(0.5));
        patch.connect(c, 0, smooth, 0).unwrap();

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_relative_eq!(patch.outlet_value(smooth, 0).unwrap().as_numeric().unwrap(), 5.0);
        engine.tick_headless(&mut patch);
        assert_relative_eq!(patch.outlet_value(smooth, 0).unwrap().as_numeric().unwrap(), 7.5);
    }

    #[test]
    fn test_array_gate_selects_and_holds() {
        let mut patch = Patch::new();
        let select = patch.add_object("select", Constant::new(2.0));
        let a = patch.add_object("a", Pack::new(2));
        let gate = patch.add_object("gate", Gate::new(PinKind::Array, 2));
        let two = patch.add_object("two", Constant::new(2.0));
        patch.connect(two, 0, a, 1).unwrap();
        patch.connect(select, 0, gate, 0).unwrap();
        patch.connect(a, 0, gate, 2).unwrap();
        assert_eq!(patch.object(gate).unwrap().type_name, "array gate");

        let mut engine = TickEngine::default();
        engine.run(&mut patch, 2);
        assert_eq!(
            patch.outlet_value(gate, 0),
            Some(&PinValue::Array(vec![0.0, 2.0]))
        );

        // Out of range selector holds the last routed value
        patch.set_custom_var(select, "value", 7.0);
        engine.run(&mut patch, 2);
        assert_eq!(
            patch.outlet_value(gate, 0),
            Some(&PinValue::Array(vec![0.0, 2.0]))
        );
    }

    #[test]
    fn test_spigot_closed_outputs_sentinel() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(6.0));
        let spigot = patch.add_object("spigot", Spigot::new());
        patch.connect(c, 0, spigot, 0).unwrap();

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(spigot, 0), Some(&PinValue::Numeric(0.0)));

        let open = patch.add_object("open", Constant::new(1.0));
        patch.connect(open, 0, spigot, 1).unwrap();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(spigot, 0), Some(&PinValue::Numeric(6.0)));
    }

    #[test]
    fn test_message_waits_for_bang_once_wired() {
        let mut patch = Patch::new();
        let msg = patch.add_object("msg", Message::new("hi"));
        let zero = patch.add_object("zero", Constant::new(0.0));

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(msg, 0).unwrap().as_str(), Some("hi"));

        patch.connect(zero, 0, msg, 0).unwrap();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(msg, 0).unwrap().as_str(), Some(""));
    }

    #[test]
    fn test_audio_round_trip_through_endpoints() {
        let mut patch = Patch::new();
        let input = patch.add_object("in", AudioIn::default());
        let output = patch.add_object("out", AudioOut::default());
        patch.connect(input, 0, output, 0).unwrap();

        let endpoints = patch.audio_endpoints();
        assert_eq!(endpoints.len(), 2);
        endpoints[0].audio_in(&[0.25; 8]);

        // One frame to reach AudioIn's outlet, one more to cross the link
        let mut engine = TickEngine::default();
        engine.run(&mut patch, 2);

        let mut out = [0.0f32; 8];
        endpoints[1].audio_out(&mut out);
        assert_eq!(out, [0.25; 8]);
        assert_relative_eq!(
            patch.outlet_value(input, 1).unwrap().as_numeric().unwrap(),
            0.25
        );
    }

    #[test]
    fn test_text_file_loads_in_background() {
        let path = std::env::temp_dir().join(format!("trellis-text-{}.txt", std::process::id()));
        std::fs::write(&path, "hello patch").unwrap();

        let mut patch = Patch::new();
        let file = patch.add_object("file", TextFile::new(path.to_string_lossy()));
        let bang = patch.add_object("bang", Constant::new(1.0));
        patch.connect(bang, 0, file, 0).unwrap();

        // The trigger stays high for the whole run
        let mut engine = TickEngine::default();
        for _ in 0..200 {
            engine.tick_headless(&mut patch);
            if patch.outlet_value(file, 0).unwrap().as_str() == Some("hello patch") {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(
            patch.outlet_value(file, 0).unwrap().as_str(),
            Some("hello patch")
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_text_file_reloads_on_next_rising_edge() {
        let path = std::env::temp_dir().join(format!("trellis-reload-{}.txt", std::process::id()));
        std::fs::write(&path, "first").unwrap();

        let mut patch = Patch::new();
        let file = patch.add_object("file", TextFile::new(path.to_string_lossy()));
        let trigger = patch.add_object("trigger", Constant::new(1.0));
        patch.connect(trigger, 0, file, 0).unwrap();

        let mut engine = TickEngine::default();
        let mut wait_for = |patch: &mut Patch, text: &str| {
            for _ in 0..200 {
                engine.tick_headless(patch);
                if patch.outlet_value(file, 0).unwrap().as_str() == Some(text) {
                    return true;
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            false
        };
        assert!(wait_for(&mut patch, "first"));

        // Still high: no new load even though the file changed
        std::fs::write(&path, "second").unwrap();
        engine_frames(&mut patch, 5);
        assert_eq!(patch.outlet_value(file, 0).unwrap().as_str(), Some("first"));

        patch.set_custom_var(trigger, "value", 0.0);
        engine_frames(&mut patch, 2);
        patch.set_custom_var(trigger, "value", 1.0);
        assert!(wait_for(&mut patch, "second"));
        std::fs::remove_file(&path).ok();
    }

    fn engine_frames(patch: &mut Patch, frames: usize) {
        TickEngine::default().run(patch, frames);
    }
}
