//! Patch Object Contract
//!
//! Every behavior placed on a patch implements [`PatchObject`]. The patch
//! owns the object's pins, geometry and custom variables; the object only
//! sees them through the [`TickContext`], [`Inlets`] and [`Outlets`] it is
//! handed each frame.

use crate::audio::AudioEndpoint;
use crate::graph::{Edit, LinkId, ObjectId};
use crate::pin::{Inlets, Outlets, PinIndex, PinSpec, PinValue};
use crate::render::DrawList;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error raised from inside an object's `on_tick` or `render`
///
/// Faults never escape the frame loop; they are logged and freeze the
/// offending object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFault {
    message: String,
}

impl ObjectFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("panicked: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("panicked: {}", s)
        } else {
            "panicked".to_string()
        };
        Self { message }
    }
}

impl std::fmt::Display for ObjectFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Object fault: {}", self.message)
    }
}

impl std::error::Error for ObjectFault {}

/// Shared flag that goes false once an object has been erased
///
/// Hand a clone to anything that outlives a frame (worker threads, audio
/// endpoints) and check it before touching the object's state.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted per-object setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomValue {
    Float(f64),
    Text(String),
}

impl CustomValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            CustomValue::Float(v) => Some(*v),
            CustomValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CustomValue::Text(s) => Some(s),
            CustomValue::Float(_) => None,
        }
    }
}

impl From<f64> for CustomValue {
    fn from(v: f64) -> Self {
        CustomValue::Float(v)
    }
}

impl From<&str> for CustomValue {
    fn from(s: &str) -> Self {
        CustomValue::Text(s.to_string())
    }
}

impl From<String> for CustomValue {
    fn from(s: String) -> Self {
        CustomValue::Text(s)
    }
}

/// Key/value settings stored with an object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomVars(BTreeMap<String, CustomValue>);

impl CustomVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CustomValue> {
        self.0.get(key)
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(CustomValue::as_float)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(CustomValue::as_text)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<CustomValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<CustomValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CustomValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-object view of the patch during `on_tick`
///
/// Structural edits requested here are queued and applied at the end of the
/// frame, after every object has been ticked and rendered.
pub struct TickContext<'a> {
    id: ObjectId,
    frame: u64,
    liveness: &'a Liveness,
    vars: &'a mut CustomVars,
    edits: &'a mut Vec<(ObjectId, Edit)>,
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(
        id: ObjectId,
        frame: u64,
        liveness: &'a Liveness,
        vars: &'a mut CustomVars,
        edits: &'a mut Vec<(ObjectId, Edit)>,
    ) -> Self {
        Self {
            id,
            frame,
            liveness,
            vars,
            edits,
        }
    }

    /// Id of the object being ticked
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Number of the frame being computed, starting at zero
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn custom_var(&self, key: &str) -> Option<&CustomValue> {
        self.vars.get(key)
    }

    pub fn set_custom_var(&mut self, key: impl Into<String>, value: impl Into<CustomValue>) {
        self.vars.set(key, value);
    }

    /// Schedule this object for removal at the end of the frame
    pub fn remove_self(&mut self) {
        self.queue(Edit::Remove(self.id));
    }

    pub fn remove_object(&mut self, id: ObjectId) {
        self.queue(Edit::Remove(id));
    }

    pub fn create_object(&mut self, type_name: impl Into<String>, position: (f32, f32)) {
        self.queue(Edit::Create {
            type_name: type_name.into(),
            position,
        });
    }

    pub fn connect(&mut self, from: ObjectId, outlet: PinIndex, to: ObjectId, inlet: PinIndex) {
        self.queue(Edit::Connect {
            from,
            outlet,
            to,
            inlet,
        });
    }

    pub fn disconnect(&mut self, link: LinkId) {
        self.queue(Edit::Disconnect(link));
    }

    fn queue(&mut self, edit: Edit) {
        self.edits.push((self.id, edit));
    }
}

/// Type-erased behavior placed on a patch
pub trait PatchObject: Send {
    /// Declare inlets and outlets. Called exactly once, before the object
    /// is inserted into a patch; the result is fixed for the object's life.
    fn declare_pins(&mut self) -> PinSpec;

    /// Per-frame logic: read this frame's inlets, write outlets
    fn on_tick(
        &mut self,
        ctx: &mut TickContext<'_>,
        inlets: &Inlets,
        outlets: &mut Outlets,
    ) -> Result<(), ObjectFault>;

    /// Describe the object's face, after every object has ticked
    fn render(&mut self, _draw: &mut DrawList) -> Result<(), ObjectFault> {
        Ok(())
    }

    /// Registry name used for persistence
    fn type_name(&self) -> &'static str {
        "unknown"
    }

    /// Restore state from persisted custom variables
    fn load_custom_vars(&mut self, _vars: &CustomVars) {}

    /// Record the settings the object was built with, so a saved patch
    /// restores them. Called once on insertion.
    fn store_custom_vars(&self, _vars: &mut CustomVars) {}

    /// Outlet values to hold before the first tick, for outlets whose
    /// initial value follows custom variables. Re-read whenever variables
    /// change on an object that has not ticked yet; kinds must match the
    /// declared pins.
    fn initial_outlets(&self) -> Vec<(PinIndex, PinValue)> {
        Vec::new()
    }

    /// Real-time entry points for audio-bearing objects
    fn audio_endpoint(&self) -> Option<Arc<dyn AudioEndpoint>> {
        None
    }

    /// Reset internal state
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_fault_from_panic_payloads() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(ObjectFault::from_panic(payload).message(), "panicked: boom");

        let payload = panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(
            ObjectFault::from_panic(payload).message(),
            "panicked: formatted 1"
        );
    }

    #[test]
    fn test_liveness_shared_between_clones() {
        let alive = Liveness::new();
        let observer = alive.clone();
        assert!(observer.is_alive());
        alive.kill();
        assert!(!observer.is_alive());
    }

    #[test]
    fn test_custom_vars() {
        let mut vars = CustomVars::new();
        vars.set("gain", 0.5);
        vars.set("label", "kick");
        assert_eq!(vars.float("gain"), Some(0.5));
        assert_eq!(vars.text("label"), Some("kick"));
        assert_eq!(vars.float("label"), None);
        assert_eq!(vars.len(), 2);

        vars.set("gain", 0.75);
        assert_eq!(vars.float("gain"), Some(0.75));
        assert!(vars.remove("gain").is_some());
        assert!(vars.get("gain").is_none());
    }

    #[test]
    fn test_custom_vars_json_shape() {
        let mut vars = CustomVars::new();
        vars.set("value", 5.0);
        vars.set("name", "osc");
        let json = serde_json::to_string(&vars).unwrap();
        assert_eq!(json, r#"{"name":"osc","value":5.0}"#);

        let back: CustomVars = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vars);
    }

    #[test]
    fn test_context_queues_edits_tagged_with_issuer() {
        let id = ObjectId::default();
        let liveness = Liveness::new();
        let mut vars = CustomVars::new();
        let mut edits = Vec::new();
        let mut ctx = TickContext::new(id, 3, &liveness, &mut vars, &mut edits);

        assert_eq!(ctx.frame(), 3);
        ctx.set_custom_var("count", 2.0);
        ctx.remove_self();
        ctx.create_object("add", (1.0, 2.0));

        assert_eq!(vars.float("count"), Some(2.0));
        assert_eq!(edits.len(), 2);
        assert!(matches!(edits[0], (issuer, Edit::Remove(target)) if issuer == id && target == id));
        assert!(matches!(&edits[1].1, Edit::Create { type_name, .. } if type_name == "add"));
    }
}
