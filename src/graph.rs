//! Patch Graph
//!
//! This module owns the live objects (an arena keyed by stable ids) and the
//! links between their pins. Structural edits are validated here; the
//! per-frame phases that [`crate::TickEngine`] drives (snapshot, propagation,
//! update, render, garbage) are implemented on [`Patch`] as crate-private
//! steps so the engine never reaches into the arena directly.

use crate::audio::EndpointHandle;
use crate::config::{AudioSettings, EngineConfig};
use crate::object::{CustomValue, CustomVars, Liveness, ObjectFault, PatchObject, TickContext};
use crate::pin::{Inlets, Outlets, PinDirection, PinIndex, PinKind, PinSpec, PinValue};
use crate::render::{Canvas, DrawList, LinkFrame, ObjectFrame};
use crate::serialize::ObjectRegistry;
use rtrb::{Consumer, Producer, RingBuffer};
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

new_key_type! {
    /// Stable identifier of an object within a patch
    pub struct ObjectId;

    /// Stable identifier of a link within a patch
    pub struct LinkId;
}

impl ObjectId {
    pub fn as_u64(self) -> u64 {
        self.data().as_ffi()
    }

    pub fn from_u64(raw: u64) -> Self {
        KeyData::from_ffi(raw).into()
    }
}

impl LinkId {
    pub fn as_u64(self) -> u64 {
        self.data().as_ffi()
    }

    pub fn from_u64(raw: u64) -> Self {
        KeyData::from_ffi(raw).into()
    }
}

/// Reference to a specific pin on a specific object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinRef {
    pub object: ObjectId,
    pub pin: PinIndex,
}

/// A link from an outlet to an inlet of the same kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub id: LinkId,
    pub from: PinRef,
    pub to: PinRef,
    pub kind: PinKind,
    pub enabled: bool,
}

/// Public description of an object on the patch
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub id: ObjectId,
    /// Registry name the object was created from
    pub type_name: String,
    /// Name shown on the canvas
    pub name: String,
    pub position: (f32, f32),
    pub size: (f32, f32),
    pub marked_for_removal: bool,
    /// Set when the object faulted; it stays frozen until cleared
    pub fault: Option<ObjectFault>,
}

impl ObjectInfo {
    pub fn is_live(&self) -> bool {
        !self.marked_for_removal
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }
}

/// Internal node representation
struct Node {
    object: Box<dyn PatchObject>,
    info: ObjectInfo,
    pins: PinSpec,
    inlets: Inlets,
    outlets: Outlets,
    scratch: Outlets,
    vars: CustomVars,
    liveness: Liveness,
    /// Set once `on_tick` has been attempted
    started: bool,
}

impl Node {
    /// Apply custom variables, re-seeding outlet initials while the object
    /// has not ticked yet
    fn load_vars(&mut self) {
        self.object.load_custom_vars(&self.vars);
        if self.started {
            return;
        }
        for (index, value) in self.object.initial_outlets() {
            match self.pins.outlets.get_mut(index) {
                Some(def) if def.kind == value.kind() => {
                    def.initial = value.clone();
                    // Kinds were just checked against the declaration
                    let _ = self.outlets.set(index, value);
                }
                _ => warn!(
                    object_id = self.info.id.as_u64(),
                    name = %self.info.name,
                    outlet = index,
                    "initial outlet value does not match declared pins"
                ),
            }
        }
        self.scratch.clone_from(&self.outlets);
    }
}

/// Error types for patch operations
#[derive(Debug, Clone, PartialEq)]
pub enum PatchError {
    UnknownObjectType(String),
    TypeMismatch {
        from: PinKind,
        to: PinKind,
    },
    DanglingReference(ObjectId),
    InvalidPin {
        object: ObjectId,
        direction: PinDirection,
        index: PinIndex,
    },
    Serialization(String),
}

impl std::fmt::Display for PatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::UnknownObjectType(name) => write!(f, "Unknown object type: {}", name),
            PatchError::TypeMismatch { from, to } => {
                write!(f, "Type mismatch: cannot link {} outlet to {} inlet", from, to)
            }
            PatchError::DanglingReference(id) => {
                write!(f, "Dangling reference to object {}", id.as_u64())
            }
            PatchError::InvalidPin {
                object,
                direction,
                index,
            } => write!(f, "Object {} has no {} {}", object.as_u64(), direction, index),
            PatchError::Serialization(msg) => write!(f, "Serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for PatchError {}

/// A structural change, applied at a frame boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Create {
        type_name: String,
        position: (f32, f32),
    },
    Remove(ObjectId),
    Connect {
        from: ObjectId,
        outlet: PinIndex,
        to: ObjectId,
        inlet: PinIndex,
    },
    Disconnect(LinkId),
    SetLinkEnabled(LinkId, bool),
    Move(ObjectId, (f32, f32)),
    /// Create an object and link it to existing objects as one step. If any
    /// link is rejected the new object is discarded.
    CreateWired {
        type_name: String,
        position: (f32, f32),
        wiring: Vec<Wire>,
    },
}

/// A link to or from an object that does not exist yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    /// From an outlet of the new object into an existing inlet
    Out {
        outlet: PinIndex,
        to: ObjectId,
        inlet: PinIndex,
    },
    /// From an existing outlet into an inlet of the new object
    In {
        from: ObjectId,
        outlet: PinIndex,
        inlet: PinIndex,
    },
}

/// Sending half of an edit queue, usable from another thread
///
/// Edits are folded into the patch at the start of the next frame. Rejected
/// edits are logged and dropped. Ids of objects created here are only known
/// once the edit is applied; use [`PatchEditor::create_wired`] to create an
/// object and link it in the same edit.
pub struct PatchEditor {
    producer: Producer<Edit>,
}

impl PatchEditor {
    /// Queue an edit. Returns it back if the queue is full.
    pub fn submit(&mut self, edit: Edit) -> Result<(), Edit> {
        self.producer
            .push(edit)
            .map_err(|rtrb::PushError::Full(edit)| edit)
    }

    pub fn create_object(
        &mut self,
        type_name: impl Into<String>,
        position: (f32, f32),
    ) -> Result<(), Edit> {
        self.submit(Edit::Create {
            type_name: type_name.into(),
            position,
        })
    }

    /// Queue a create together with the links of the new object
    pub fn create_wired(
        &mut self,
        type_name: impl Into<String>,
        position: (f32, f32),
        wiring: Vec<Wire>,
    ) -> Result<(), Edit> {
        self.submit(Edit::CreateWired {
            type_name: type_name.into(),
            position,
            wiring,
        })
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Result<(), Edit> {
        self.submit(Edit::Remove(id))
    }

    pub fn connect(
        &mut self,
        from: ObjectId,
        outlet: PinIndex,
        to: ObjectId,
        inlet: PinIndex,
    ) -> Result<(), Edit> {
        self.submit(Edit::Connect {
            from,
            outlet,
            to,
            inlet,
        })
    }

    pub fn disconnect(&mut self, link: LinkId) -> Result<(), Edit> {
        self.submit(Edit::Disconnect(link))
    }

    pub fn set_link_enabled(&mut self, link: LinkId, enabled: bool) -> Result<(), Edit> {
        self.submit(Edit::SetLinkEnabled(link, enabled))
    }

    pub fn move_object(&mut self, id: ObjectId, position: (f32, f32)) -> Result<(), Edit> {
        self.submit(Edit::Move(id, position))
    }
}

/// Result of running one object through a frame phase
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Done,
    Skipped,
    Faulted(ObjectFault),
}

const OBJECT_WIDTH: f32 = 80.0;
const HEADER_HEIGHT: f32 = 20.0;
const PIN_ROW_HEIGHT: f32 = 14.0;

fn default_size(pins: &PinSpec) -> (f32, f32) {
    let rows = pins.inlets.len().max(pins.outlets.len()) as f32;
    (OBJECT_WIDTH, HEADER_HEIGHT + rows * PIN_ROW_HEIGHT)
}

/// The main patch containing objects and links
pub struct Patch {
    nodes: SlotMap<ObjectId, Node>,
    order: Vec<ObjectId>,
    links: SlotMap<LinkId, Link>,

    registry: Arc<ObjectRegistry>,
    audio: AudioSettings,

    // Edit queues
    editor_capacity: usize,
    editors: Vec<Consumer<Edit>>,
    deferred: Vec<(ObjectId, Edit)>,
}

impl Patch {
    /// Create an empty patch with the built-in object registry
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self::with_registry(Arc::new(ObjectRegistry::new()), config)
    }

    pub fn with_registry(registry: Arc<ObjectRegistry>, config: &EngineConfig) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            order: Vec::new(),
            links: SlotMap::with_key(),
            registry,
            audio: config.audio,
            editor_capacity: config.editor_capacity.max(1),
            editors: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn audio_settings(&self) -> AudioSettings {
        self.audio
    }

    /// Instantiate a registered object type
    pub fn create_object(
        &mut self,
        type_name: &str,
        position: (f32, f32),
    ) -> Result<ObjectId, PatchError> {
        let object = self
            .registry
            .instantiate(type_name, &self.audio)
            .ok_or_else(|| PatchError::UnknownObjectType(type_name.to_string()))?;
        let name = self
            .registry
            .get_metadata(type_name)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| type_name.to_string());
        Ok(self.insert(type_name.to_string(), name, object, position))
    }

    /// Add an object instance directly, bypassing the registry
    pub fn add_object<O: PatchObject + 'static>(
        &mut self,
        name: impl Into<String>,
        object: O,
    ) -> ObjectId {
        self.add_boxed(name, Box::new(object))
    }

    pub fn add_boxed(&mut self, name: impl Into<String>, object: Box<dyn PatchObject>) -> ObjectId {
        let type_name = object.type_name().to_string();
        self.insert(type_name, name.into(), object, (0.0, 0.0))
    }

    fn insert(
        &mut self,
        type_name: String,
        name: String,
        mut object: Box<dyn PatchObject>,
        position: (f32, f32),
    ) -> ObjectId {
        // Pins are fixed before the object becomes reachable
        let pins = object.declare_pins();
        let inlets = Inlets::from_spec(&pins);
        let outlets = Outlets::from_spec(&pins);
        let scratch = outlets.clone();
        let size = default_size(&pins);
        let mut vars = CustomVars::new();
        object.store_custom_vars(&mut vars);

        let id = self.nodes.insert_with_key(|id| Node {
            object,
            info: ObjectInfo {
                id,
                type_name,
                name,
                position,
                size,
                marked_for_removal: false,
                fault: None,
            },
            pins,
            inlets,
            outlets,
            scratch,
            vars,
            liveness: Liveness::new(),
            started: false,
        });
        self.order.push(id);

        debug!(object_id = id.as_u64(), name = %self.nodes[id].info.name, "object created");
        id
    }

    /// Mark an object for removal. It stops being ticked immediately and is
    /// erased, with its links, at the end of the next frame. Idempotent.
    pub fn remove_object(&mut self, id: ObjectId) {
        if let Some(node) = self.nodes.get_mut(id) {
            if !node.info.marked_for_removal {
                node.info.marked_for_removal = true;
                debug!(object_id = id.as_u64(), name = %node.info.name, "object marked for removal");
            }
        }
    }

    /// Link an outlet to an inlet of the same kind
    ///
    /// Inlets take a single source: an existing link into `inlet` is replaced.
    pub fn connect(
        &mut self,
        from: ObjectId,
        outlet: PinIndex,
        to: ObjectId,
        inlet: PinIndex,
    ) -> Result<LinkId, PatchError> {
        let kind = self.check_link(from, outlet, to, inlet)?;

        if let Some(existing) = self.link_into(to, inlet).map(|l| l.id) {
            self.links.remove(existing);
            debug!(link_id = existing.as_u64(), "link replaced");
        }

        let link = self.links.insert_with_key(|id| Link {
            id,
            from: PinRef {
                object: from,
                pin: outlet,
            },
            to: PinRef {
                object: to,
                pin: inlet,
            },
            kind,
            enabled: true,
        });

        debug!(
            link_id = link.as_u64(),
            from = from.as_u64(),
            outlet,
            to = to.as_u64(),
            inlet,
            kind = %kind,
            "link created"
        );
        Ok(link)
    }

    /// Validate a prospective link and return its kind
    fn check_link(
        &self,
        from: ObjectId,
        outlet: PinIndex,
        to: ObjectId,
        inlet: PinIndex,
    ) -> Result<PinKind, PatchError> {
        let from_kind = self
            .live_node(from)?
            .pins
            .outlet_kind(outlet)
            .ok_or(PatchError::InvalidPin {
                object: from,
                direction: PinDirection::Outlet,
                index: outlet,
            })?;
        let to_kind = self
            .live_node(to)?
            .pins
            .inlet_kind(inlet)
            .ok_or(PatchError::InvalidPin {
                object: to,
                direction: PinDirection::Inlet,
                index: inlet,
            })?;

        if from_kind != to_kind {
            return Err(PatchError::TypeMismatch {
                from: from_kind,
                to: to_kind,
            });
        }
        Ok(from_kind)
    }

    /// Remove a link. Unknown or already removed ids are ignored.
    pub fn disconnect(&mut self, link: LinkId) {
        if self.links.remove(link).is_some() {
            debug!(link_id = link.as_u64(), "link removed");
        }
    }

    /// Enable or disable a link. Returns `false` for unknown links.
    pub fn set_link_enabled(&mut self, link: LinkId, enabled: bool) -> bool {
        match self.links.get_mut(link) {
            Some(l) => {
                l.enabled = enabled;
                true
            }
            None => false,
        }
    }

    fn live_node(&self, id: ObjectId) -> Result<&Node, PatchError> {
        self.nodes
            .get(id)
            .filter(|n| n.info.is_live())
            .ok_or(PatchError::DanglingReference(id))
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// The link feeding an inlet, if any
    pub fn link_into(&self, object: ObjectId, inlet: PinIndex) -> Option<&Link> {
        self.links
            .values()
            .find(|l| l.to.object == object && l.to.pin == inlet)
    }

    pub fn links_from(&self, object: ObjectId, outlet: PinIndex) -> impl Iterator<Item = &Link> {
        self.links
            .values()
            .filter(move |l| l.from.object == object && l.from.pin == outlet)
    }

    /// Whether an enabled link feeds the inlet
    pub fn is_inlet_connected(&self, object: ObjectId, inlet: PinIndex) -> bool {
        self.link_into(object, inlet)
            .map(|l| l.enabled)
            .unwrap_or(false)
    }

    /// Iterate over objects in insertion order, including removal-marked ones
    pub fn objects(&self) -> impl Iterator<Item = &ObjectInfo> {
        self.order
            .iter()
            .filter_map(move |id| self.nodes.get(*id).map(|n| &n.info))
    }

    pub fn object(&self, id: ObjectId) -> Option<&ObjectInfo> {
        self.nodes.get(id).map(|n| &n.info)
    }

    pub fn pins(&self, id: ObjectId) -> Option<&PinSpec> {
        self.nodes.get(id).map(|n| &n.pins)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Present and not marked for removal
    pub fn is_live(&self, id: ObjectId) -> bool {
        self.live_node(id).is_ok()
    }

    pub fn object_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn live_count(&self) -> usize {
        self.nodes.values().filter(|n| n.info.is_live()).count()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Value delivered to an inlet during the last propagation phase
    pub fn inlet_value(&self, id: ObjectId, inlet: PinIndex) -> Option<&PinValue> {
        self.nodes.get(id).and_then(|n| n.inlets.get(inlet))
    }

    pub fn outlet_value(&self, id: ObjectId, outlet: PinIndex) -> Option<&PinValue> {
        self.nodes.get(id).and_then(|n| n.outlets.get(outlet))
    }

    pub fn set_position(&mut self, id: ObjectId, position: (f32, f32)) -> bool {
        self.with_info(id, |info| info.position = position)
    }

    pub fn set_size(&mut self, id: ObjectId, size: (f32, f32)) -> bool {
        self.with_info(id, |info| info.size = size)
    }

    pub fn set_name(&mut self, id: ObjectId, name: impl Into<String>) -> bool {
        let name = name.into();
        self.with_info(id, |info| info.name = name)
    }

    fn with_info(&mut self, id: ObjectId, f: impl FnOnce(&mut ObjectInfo)) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                f(&mut node.info);
                true
            }
            None => false,
        }
    }

    pub fn custom_var(&self, id: ObjectId, key: &str) -> Option<&CustomValue> {
        self.nodes.get(id).and_then(|n| n.vars.get(key))
    }

    pub fn custom_vars(&self, id: ObjectId) -> Option<&CustomVars> {
        self.nodes.get(id).map(|n| &n.vars)
    }

    /// Store a setting and let the object pick it up
    pub fn set_custom_var(
        &mut self,
        id: ObjectId,
        key: impl Into<String>,
        value: impl Into<CustomValue>,
    ) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.vars.set(key, value);
                node.load_vars();
                true
            }
            None => false,
        }
    }

    /// Replace all settings of an object and let it pick them up
    pub fn set_custom_vars(&mut self, id: ObjectId, vars: CustomVars) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.vars = vars;
                node.load_vars();
                true
            }
            None => false,
        }
    }

    /// Unfreeze a faulted object. Returns `true` if it was faulted.
    pub fn clear_fault(&mut self, id: ObjectId) -> bool {
        self.nodes
            .get_mut(id)
            .and_then(|n| n.info.fault.take())
            .is_some()
    }

    /// Reset every object and return outlets to their initial values
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.object.reset();
            node.outlets = Outlets::from_spec(&node.pins);
            node.scratch = node.outlets.clone();
            node.inlets.reset();
            node.started = false;
        }
    }

    /// Real-time endpoints of every live audio-bearing object
    pub fn audio_endpoints(&self) -> Vec<EndpointHandle> {
        self.order
            .iter()
            .filter_map(|&id| {
                let node = self.nodes.get(id).filter(|n| n.info.is_live())?;
                let endpoint = node.object.audio_endpoint()?;
                Some(EndpointHandle::new(id, endpoint, node.liveness.clone()))
            })
            .collect()
    }

    /// Liveness flag of an object, for work that outlives a frame
    pub fn liveness(&self, id: ObjectId) -> Option<Liveness> {
        self.nodes.get(id).map(|n| n.liveness.clone())
    }

    /// Open a new edit queue that can be moved to another thread
    pub fn editor(&mut self) -> PatchEditor {
        let (producer, consumer) = RingBuffer::new(self.editor_capacity);
        self.editors.push(consumer);
        PatchEditor { producer }
    }

    /// Apply a single edit immediately
    pub fn apply_edit(&mut self, edit: Edit) -> Result<(), PatchError> {
        match edit {
            Edit::Create {
                type_name,
                position,
            } => self.create_object(&type_name, position).map(|_| ()),
            Edit::Remove(id) => {
                self.remove_object(id);
                Ok(())
            }
            Edit::Connect {
                from,
                outlet,
                to,
                inlet,
            } => self.connect(from, outlet, to, inlet).map(|_| ()),
            Edit::Disconnect(link) => {
                self.disconnect(link);
                Ok(())
            }
            Edit::SetLinkEnabled(link, enabled) => {
                self.set_link_enabled(link, enabled);
                Ok(())
            }
            Edit::Move(id, position) => {
                self.set_position(id, position);
                Ok(())
            }
            Edit::CreateWired {
                type_name,
                position,
                wiring,
            } => self.create_wired(&type_name, position, &wiring).map(|_| ()),
        }
    }

    /// Create an object and its links, or nothing at all
    pub fn create_wired(
        &mut self,
        type_name: &str,
        position: (f32, f32),
        wiring: &[Wire],
    ) -> Result<ObjectId, PatchError> {
        let id = self.create_object(type_name, position)?;
        let endpoints = |wire: &Wire| match *wire {
            Wire::Out { outlet, to, inlet } => (id, outlet, to, inlet),
            Wire::In {
                from,
                outlet,
                inlet,
            } => (from, outlet, id, inlet),
        };

        // Every link is checked before any existing inlet link is replaced
        for wire in wiring {
            let (from, outlet, to, inlet) = endpoints(wire);
            if let Err(error) = self.check_link(from, outlet, to, inlet) {
                self.discard(id);
                return Err(error);
            }
        }
        for wire in wiring {
            let (from, outlet, to, inlet) = endpoints(wire);
            self.connect(from, outlet, to, inlet)?;
        }
        Ok(id)
    }

    /// Erase an object that has never run, with its links
    fn discard(&mut self, id: ObjectId) {
        if let Some(node) = self.nodes.remove(id) {
            node.liveness.kill();
            self.links
                .retain(|_, l| l.from.object != id && l.to.object != id);
            self.order.retain(|o| *o != id);
            debug!(object_id = id.as_u64(), "object discarded");
        }
    }

    // =========================================================================
    // Frame phases, driven by the tick engine
    // =========================================================================

    /// Fold in edits queued by editors since the last frame
    pub(crate) fn drain_editors(&mut self) -> usize {
        let mut edits = Vec::new();
        for consumer in &mut self.editors {
            while let Ok(edit) = consumer.pop() {
                edits.push(edit);
            }
        }
        self.editors.retain(|c| !c.is_abandoned());

        let count = edits.len();
        for edit in edits {
            if let Err(error) = self.apply_edit(edit) {
                warn!(%error, "queued edit rejected");
            }
        }
        count
    }

    /// Drop links whose endpoints are gone or marked for removal
    pub(crate) fn purge_stale_links(&mut self) -> usize {
        let nodes = &self.nodes;
        let before = self.links.len();
        self.links.retain(|_, link| {
            [link.from.object, link.to.object]
                .iter()
                .all(|id| nodes.get(*id).map(|n| n.info.is_live()).unwrap_or(false))
        });
        let purged = before - self.links.len();
        if purged > 0 {
            debug!(purged, "stale links purged");
        }
        purged
    }

    /// Live object ids in stable order
    pub(crate) fn live_ids(&self) -> Vec<ObjectId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.nodes.get(id).map(|n| n.info.is_live()).unwrap_or(false))
            .collect()
    }

    /// Copy each enabled link's source outlet into its destination inlet.
    /// Outlets still hold last frame's values, so every hop costs one frame.
    pub(crate) fn propagate(&mut self, live: &[ObjectId]) -> usize {
        for &id in live {
            if let Some(node) = self.nodes.get_mut(id) {
                node.inlets.reset();
            }
        }

        let mut delivered = 0;
        for link in self.links.values() {
            if !link.enabled {
                continue;
            }
            let value = match self
                .nodes
                .get(link.from.object)
                .and_then(|n| n.outlets.get(link.from.pin))
            {
                Some(v) => v.clone(),
                None => continue,
            };
            if let Some(node) = self.nodes.get_mut(link.to.object) {
                if node.inlets.deliver(link.to.pin, value) {
                    delivered += 1;
                } else {
                    warn!(link_id = link.id.as_u64(), "value of mismatched kind dropped");
                }
            }
        }
        delivered
    }

    /// Run one object's `on_tick`. Outlets are committed only on success.
    pub(crate) fn tick_object(&mut self, id: ObjectId, frame: u64) -> Outcome {
        let Patch {
            nodes, deferred, ..
        } = self;
        let node = match nodes.get_mut(id) {
            Some(node) if node.info.is_live() && !node.info.is_faulted() => node,
            _ => return Outcome::Skipped,
        };
        let Node {
            object,
            info,
            inlets,
            outlets,
            scratch,
            vars,
            liveness,
            started,
            ..
        } = node;

        *started = true;
        scratch.clone_from(outlets);
        let queued = deferred.len();
        let result = {
            let mut ctx = TickContext::new(id, frame, liveness, vars, deferred);
            panic::catch_unwind(AssertUnwindSafe(|| {
                object.on_tick(&mut ctx, inlets, scratch)
            }))
        };

        match result.map_err(ObjectFault::from_panic).and_then(|r| r) {
            Ok(()) => {
                std::mem::swap(outlets, scratch);
                Outcome::Done
            }
            Err(fault) => {
                deferred.truncate(queued);
                warn!(
                    object_id = id.as_u64(),
                    name = %info.name,
                    %fault,
                    "object faulted during tick, outlets frozen"
                );
                info.fault = Some(fault.clone());
                Outcome::Faulted(fault)
            }
        }
    }

    /// Run one object's `render` and hand the result to the canvas.
    /// Faulted objects are still shown, with an empty draw list.
    pub(crate) fn render_object(&mut self, id: ObjectId, canvas: &mut dyn Canvas) -> Outcome {
        let node = match self.nodes.get_mut(id) {
            Some(node) if node.info.is_live() => node,
            _ => return Outcome::Skipped,
        };

        let mut draw = DrawList::new();
        let mut outcome = Outcome::Done;
        if !node.info.is_faulted() {
            let object = &mut node.object;
            let result = panic::catch_unwind(AssertUnwindSafe(|| object.render(&mut draw)));
            if let Err(fault) = result.map_err(ObjectFault::from_panic).and_then(|r| r) {
                warn!(
                    object_id = id.as_u64(),
                    name = %node.info.name,
                    %fault,
                    "object faulted during render"
                );
                node.info.fault = Some(fault.clone());
                draw.clear();
                outcome = Outcome::Faulted(fault);
            }
        }

        let frame = ObjectFrame {
            id,
            name: &node.info.name,
            position: node.info.position,
            size: node.info.size,
            pins: &node.pins,
            inlets_connected: node.inlets.connected_flags(),
            faulted: node.info.is_faulted(),
        };
        canvas.draw_object(&frame, &draw);
        outcome
    }

    /// Hand every enabled link between live objects to the canvas
    pub(crate) fn render_links(&self, canvas: &mut dyn Canvas) -> usize {
        let mut drawn = 0;
        for link in self.links.values().filter(|l| l.enabled) {
            let (Some(from), Some(to)) = (
                self.nodes.get(link.from.object).filter(|n| n.info.is_live()),
                self.nodes.get(link.to.object).filter(|n| n.info.is_live()),
            ) else {
                continue;
            };
            canvas.draw_link(&LinkFrame {
                id: link.id,
                kind: link.kind,
                from: (link.from.object, link.from.pin),
                to: (link.to.object, link.to.pin),
                from_position: from.info.position,
                to_position: to.info.position,
            });
            drawn += 1;
        }
        drawn
    }

    /// Apply edits objects queued during this frame, in stable object order
    pub(crate) fn apply_deferred(&mut self) -> usize {
        let mut edits = std::mem::take(&mut self.deferred);
        if edits.is_empty() {
            return 0;
        }

        let rank: HashMap<ObjectId, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        edits.sort_by_key(|(issuer, _)| rank.get(issuer).copied().unwrap_or(usize::MAX));

        let count = edits.len();
        for (issuer, edit) in edits {
            if let Err(error) = self.apply_edit(edit) {
                warn!(object_id = issuer.as_u64(), %error, "edit queued by object rejected");
            }
        }
        count
    }

    /// Erase removal-marked objects and every link touching them
    pub(crate) fn collect_garbage(&mut self) -> usize {
        let doomed: Vec<ObjectId> = self
            .order
            .iter()
            .copied()
            .filter(|&id| {
                self.nodes
                    .get(id)
                    .map(|n| n.info.marked_for_removal)
                    .unwrap_or(false)
            })
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        for &id in &doomed {
            if let Some(node) = self.nodes.remove(id) {
                node.liveness.kill();
                debug!(object_id = id.as_u64(), name = %node.info.name, "object erased");
            }
        }

        let nodes = &self.nodes;
        self.links
            .retain(|_, l| nodes.contains_key(l.from.object) && nodes.contains_key(l.to.object));
        self.order.retain(|id| nodes.contains_key(*id));
        doomed.len()
    }
}

impl Default for Patch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Add, Constant, Message};
    use crate::pin::PinKind;

    fn numeric_pair(patch: &mut Patch) -> (ObjectId, ObjectId) {
        let c = patch.add_object("c", Constant::new(1.0));
        let a = patch.add_object("a", Add::new());
        (c, a)
    }

    #[test]
    fn test_add_object() {
        let mut patch = Patch::new();
        let id = patch.add_object("five", Constant::new(5.0));
        assert_eq!(patch.object_count(), 1);
        assert_eq!(patch.object(id).unwrap().name, "five");
        assert_eq!(patch.object(id).unwrap().type_name, "constant");
        assert_eq!(patch.outlet_value(id, 0), Some(&PinValue::Numeric(5.0)));
    }

    #[test]
    fn test_create_unknown_type() {
        let mut patch = Patch::new();
        let result = patch.create_object("no such thing", (0.0, 0.0));
        assert_eq!(
            result,
            Err(PatchError::UnknownObjectType("no such thing".into()))
        );
        assert_eq!(patch.object_count(), 0);
    }

    #[test]
    fn test_create_from_registry() {
        let mut patch = Patch::new();
        let id = patch.create_object("add", (10.0, 20.0)).unwrap();
        let info = patch.object(id).unwrap();
        assert_eq!(info.type_name, "add");
        assert_eq!(info.position, (10.0, 20.0));
        assert_eq!(patch.pins(id).unwrap().inlets.len(), 2);
    }

    #[test]
    fn test_object_id_u64_round_trip() {
        let mut patch = Patch::new();
        let id = patch.add_object("c", Constant::new(0.0));
        assert_eq!(ObjectId::from_u64(id.as_u64()), id);
        assert_ne!(id.as_u64(), 0);
    }

    #[test]
    fn test_connect() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);

        let link = patch.connect(c, 0, a, 0).unwrap();
        assert_eq!(patch.link_count(), 1);
        assert_eq!(patch.link_into(a, 0).map(|l| l.id), Some(link));
        assert!(patch.link_into(a, 1).is_none());
        assert!(patch.is_inlet_connected(a, 0));
        assert!(!patch.is_inlet_connected(a, 1));
        assert_eq!(patch.links_from(c, 0).count(), 1);
    }

    #[test]
    fn test_connect_type_mismatch_for_every_kind_pair() {
        use crate::objects::Stub;

        let mut patch = Patch::new();
        for from_kind in PinKind::ALL {
            for to_kind in PinKind::ALL {
                let src = patch.add_object("src", Stub::new(&[], &[from_kind]));
                let dst = patch.add_object("dst", Stub::new(&[to_kind], &[]));
                let before = patch.link_count();
                let result = patch.connect(src, 0, dst, 0);
                if from_kind == to_kind {
                    assert!(result.is_ok());
                } else {
                    assert_eq!(
                        result,
                        Err(PatchError::TypeMismatch {
                            from: from_kind,
                            to: to_kind
                        })
                    );
                    assert_eq!(patch.link_count(), before);
                }
            }
        }
    }

    #[test]
    fn test_connect_invalid_pin() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);

        assert_eq!(
            patch.connect(c, 3, a, 0),
            Err(PatchError::InvalidPin {
                object: c,
                direction: PinDirection::Outlet,
                index: 3
            })
        );
        assert_eq!(
            patch.connect(c, 0, a, 2),
            Err(PatchError::InvalidPin {
                object: a,
                direction: PinDirection::Inlet,
                index: 2
            })
        );
        assert_eq!(patch.link_count(), 0);
    }

    #[test]
    fn test_connect_to_removed_object_is_dangling() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);

        patch.remove_object(a);
        assert!(patch.contains(a));
        assert!(!patch.is_live(a));
        assert_eq!(
            patch.connect(c, 0, a, 0),
            Err(PatchError::DanglingReference(a))
        );

        let never = ObjectId::from_u64(0xdead_beef);
        assert_eq!(
            patch.connect(never, 0, c, 0),
            Err(PatchError::DanglingReference(never))
        );
    }

    #[test]
    fn test_connect_replaces_existing_inlet_link() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);
        let other = patch.add_object("other", Constant::new(2.0));

        let first = patch.connect(c, 0, a, 0).unwrap();
        let second = patch.connect(other, 0, a, 0).unwrap();

        assert_eq!(patch.link_count(), 1);
        assert!(patch.link(first).is_none());
        assert_eq!(patch.link_into(a, 0).unwrap().id, second);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);
        let link = patch.connect(c, 0, a, 0).unwrap();

        patch.disconnect(link);
        patch.disconnect(link);
        patch.disconnect(LinkId::default());
        assert_eq!(patch.link_count(), 0);
    }

    #[test]
    fn test_link_enable_flag() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);
        let link = patch.connect(c, 0, a, 0).unwrap();

        assert!(patch.set_link_enabled(link, false));
        assert!(!patch.is_inlet_connected(a, 0));
        assert!(patch.set_link_enabled(link, true));
        assert!(patch.is_inlet_connected(a, 0));

        patch.disconnect(link);
        assert!(!patch.set_link_enabled(link, true));
    }

    #[test]
    fn test_remove_is_idempotent_and_deferred() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);
        patch.connect(c, 0, a, 0).unwrap();

        patch.remove_object(c);
        patch.remove_object(c);
        assert_eq!(patch.object_count(), 2);
        assert_eq!(patch.live_count(), 1);
        assert_eq!(patch.live_ids(), vec![a]);

        assert_eq!(patch.purge_stale_links(), 1);
        assert_eq!(patch.collect_garbage(), 1);
        assert!(!patch.contains(c));
        assert_eq!(patch.object_count(), 1);

        // Removing an erased object is a no-op
        patch.remove_object(c);
    }

    #[test]
    fn test_garbage_kills_liveness() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(0.0));
        let liveness = patch.liveness(c).unwrap();

        patch.remove_object(c);
        assert!(liveness.is_alive());
        patch.collect_garbage();
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_editor_edits_fold_in_on_drain() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);
        let mut editor = patch.editor();

        editor.connect(c, 0, a, 1).unwrap();
        editor.create_object("multiply", (5.0, 5.0)).unwrap();
        editor.create_object("bogus", (0.0, 0.0)).unwrap();
        assert_eq!(patch.link_count(), 0);

        assert_eq!(patch.drain_editors(), 3);
        assert_eq!(patch.link_count(), 1);
        assert_eq!(patch.object_count(), 3);
        assert!(patch.is_inlet_connected(a, 1));
    }

    #[test]
    fn test_editor_works_across_threads() {
        let mut patch = Patch::new();
        let mut editor = patch.editor();

        std::thread::spawn(move || {
            for i in 0..4 {
                editor.create_object("constant", (i as f32, 0.0)).unwrap();
            }
        })
        .join()
        .unwrap();

        assert_eq!(patch.drain_editors(), 4);
        assert_eq!(patch.object_count(), 4);
        // Abandoned queues are dropped once drained
        assert!(patch.editors.is_empty());
    }

    #[test]
    fn test_editor_full_queue_returns_edit() {
        let config = EngineConfig::default().with_editor_capacity(1);
        let mut patch = Patch::with_config(&config);
        let mut editor = patch.editor();

        editor.create_object("add", (0.0, 0.0)).unwrap();
        let rejected = editor.create_object("multiply", (0.0, 0.0)).unwrap_err();
        assert!(matches!(rejected, Edit::Create { type_name, .. } if type_name == "multiply"));
    }

    #[test]
    fn test_propagate_copies_outlets_and_resets_unfed_inlets() {
        let mut patch = Patch::new();
        let (c, a) = numeric_pair(&mut patch);
        let link = patch.connect(c, 0, a, 0).unwrap();

        let live = patch.live_ids();
        assert_eq!(patch.propagate(&live), 1);
        assert_eq!(patch.inlet_value(a, 0), Some(&PinValue::Numeric(1.0)));

        patch.set_link_enabled(link, false);
        assert_eq!(patch.propagate(&live), 0);
        assert_eq!(patch.inlet_value(a, 0), Some(&PinValue::Numeric(0.0)));
    }

    #[test]
    fn test_string_pins() {
        let mut patch = Patch::new();
        let msg = patch.add_object("msg", Message::new("hello"));
        let stub = patch.add_object("stub", crate::objects::Stub::new(&[PinKind::String], &[]));
        patch.connect(msg, 0, stub, 0).unwrap();

        let live = patch.live_ids();
        patch.propagate(&live);
        assert_eq!(
            patch.inlet_value(stub, 0),
            Some(&PinValue::String("hello".into()))
        );
    }

    #[test]
    fn test_custom_vars_reach_object() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(1.0));
        assert!(patch.set_custom_var(c, "value", 9.0));
        assert_eq!(patch.custom_var(c, "value"), Some(&CustomValue::Float(9.0)));

        let mut engine = crate::engine::TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(c, 0), Some(&PinValue::Numeric(9.0)));
    }

    #[test]
    fn test_custom_vars_seed_outlets_until_first_tick() {
        let mut patch = Patch::new();
        let c = patch.create_object("constant", (0.0, 0.0)).unwrap();
        assert_eq!(patch.outlet_value(c, 0), Some(&PinValue::Numeric(0.0)));

        patch.set_custom_var(c, "value", 5.0);
        assert_eq!(patch.outlet_value(c, 0), Some(&PinValue::Numeric(5.0)));

        // Once ticked, only the object writes its outlets
        let mut engine = crate::engine::TickEngine::default();
        engine.tick_headless(&mut patch);
        patch.set_custom_var(c, "value", 2.0);
        assert_eq!(patch.outlet_value(c, 0), Some(&PinValue::Numeric(5.0)));
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(c, 0), Some(&PinValue::Numeric(2.0)));

        // Reset makes the next variable change seed again
        patch.reset();
        patch.set_custom_var(c, "value", 7.0);
        assert_eq!(patch.outlet_value(c, 0), Some(&PinValue::Numeric(7.0)));
    }

    #[test]
    fn test_patch_error_display() {
        let err = PatchError::TypeMismatch {
            from: PinKind::Numeric,
            to: PinKind::Texture,
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch: cannot link numeric outlet to texture inlet"
        );
        assert_eq!(
            PatchError::UnknownObjectType("x".into()).to_string(),
            "Unknown object type: x"
        );
    }
}
