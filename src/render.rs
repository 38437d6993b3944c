//! Rendering Collaborator
//!
//! The engine never draws pixels. Each frame it gives the canvas, per object,
//! the object's geometry, its declared pins and their connection state, plus
//! the [`DrawList`] the object filled in during `render`. Links are handed
//! over afterwards with the positions of both endpoints.

use crate::graph::{LinkId, ObjectId};
use crate::pin::{PinIndex, PinKind, PinSpec};

/// A primitive an object asks the canvas to draw inside its frame
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// Text line
    Label(String),

    /// Horizontal meter, `level` in 0.0–1.0
    Meter { level: f32 },

    /// Rectangle relative to the object's origin
    Rect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        filled: bool,
    },

    /// Polyline relative to the object's origin
    Plot(Vec<(f32, f32)>),
}

/// Commands collected from one object's `render`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&mut self, text: impl Into<String>) {
        self.commands.push(DrawCommand::Label(text.into()));
    }

    pub fn meter(&mut self, level: f32) {
        self.commands.push(DrawCommand::Meter {
            level: level.clamp(0.0, 1.0),
        });
    }

    pub fn rect(&mut self, x: f32, y: f32, w: f32, h: f32, filled: bool) {
        self.commands.push(DrawCommand::Rect { x, y, w, h, filled });
    }

    pub fn plot(&mut self, points: Vec<(f32, f32)>) {
        self.commands.push(DrawCommand::Plot(points));
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// What the canvas needs to draw one object
#[derive(Debug, Clone, Copy)]
pub struct ObjectFrame<'a> {
    pub id: ObjectId,
    pub name: &'a str,
    pub position: (f32, f32),
    pub size: (f32, f32),
    pub pins: &'a PinSpec,
    /// Per inlet: fed by an enabled link this frame
    pub inlets_connected: &'a [bool],
    pub faulted: bool,
}

/// What the canvas needs to draw one link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkFrame {
    pub id: LinkId,
    pub kind: PinKind,
    pub from: (ObjectId, PinIndex),
    pub to: (ObjectId, PinIndex),
    pub from_position: (f32, f32),
    pub to_position: (f32, f32),
}

/// Immediate-mode canvas fed once per frame
pub trait Canvas {
    fn draw_object(&mut self, frame: &ObjectFrame<'_>, draw: &DrawList);

    fn draw_link(&mut self, _link: &LinkFrame) {}
}

/// Canvas that discards everything, for headless runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCanvas;

impl Canvas for NullCanvas {
    fn draw_object(&mut self, _frame: &ObjectFrame<'_>, _draw: &DrawList) {}
}

/// One object as seen by a [`RecordingCanvas`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedObject {
    pub id: ObjectId,
    pub name: String,
    pub position: (f32, f32),
    pub faulted: bool,
    pub commands: Vec<DrawCommand>,
}

/// Canvas that keeps what it was given, for tests and tooling
#[derive(Debug, Clone, Default)]
pub struct RecordingCanvas {
    pub objects: Vec<RecordedObject>,
    pub links: Vec<LinkFrame>,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, id: ObjectId) -> Option<&RecordedObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.links.clear();
    }
}

impl Canvas for RecordingCanvas {
    fn draw_object(&mut self, frame: &ObjectFrame<'_>, draw: &DrawList) {
        self.objects.push(RecordedObject {
            id: frame.id,
            name: frame.name.to_string(),
            position: frame.position,
            faulted: frame.faulted,
            commands: draw.commands().to_vec(),
        });
    }

    fn draw_link(&mut self, link: &LinkFrame) {
        self.links.push(*link);
    }
}
