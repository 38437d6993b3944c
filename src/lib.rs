//! # Trellis: Visual Patching Engine
//!
//! `trellis` is the core of a dataflow ("patching") environment in the spirit
//! of Max/MSP or Pure Data: a canvas of objects exchanging typed values along
//! links, re-evaluated once per frame by an external render loop.
//!
//! ## Architecture
//!
//! - **Pins** - typed inlets and outlets carrying [`PinValue`]s of a closed
//!   set of [`PinKind`]s (numeric, string, array, texture, audio, pixels)
//! - **Objects** - behaviors implementing [`PatchObject`]; they read an inlet
//!   snapshot and write their own outlets
//! - **Patch** - the arena of live objects and the links between them,
//!   editable at any time, including from other threads via [`PatchEditor`]
//! - **TickEngine** - runs each frame as snapshot, propagation, update,
//!   render and garbage phases
//!
//! Values move one hop per frame, so cycles are legal and the result never
//! depends on the order objects are visited in. A failing object is logged
//! and frozen without stopping the rest of the patch.
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis::prelude::*;
//!
//! let mut patch = Patch::new();
//! let five = patch.create_object("constant", (0.0, 0.0)).unwrap();
//! let three = patch.create_object("constant", (0.0, 40.0)).unwrap();
//! let add = patch.create_object("add", (120.0, 20.0)).unwrap();
//! patch.set_custom_var(five, "value", 5.0);
//! patch.set_custom_var(three, "value", 3.0);
//!
//! patch.connect(five, 0, add, 0).unwrap();
//! patch.connect(three, 0, add, 1).unwrap();
//!
//! let mut engine = TickEngine::default();
//! engine.run(&mut patch, 2);
//! assert_eq!(patch.outlet_value(add, 0), Some(&PinValue::Numeric(8.0)));
//! ```

pub mod audio;
pub mod config;
pub mod deferred;
pub mod engine;
pub mod graph;
pub mod object;
pub mod objects;
pub mod pin;
pub mod render;
pub mod serialize;
pub mod visual;

/// Prelude module for convenient imports
pub mod prelude {
    // Pins
    pub use crate::pin::{
        Inlets, Outlets, PinDef, PinDirection, PinIndex, PinKind, PinSpec, PinValue,
        PixelBuffer, TextureHandle,
    };

    // Object contract
    pub use crate::object::{
        CustomValue, CustomVars, Liveness, ObjectFault, PatchObject, TickContext,
    };

    // Patch graph
    pub use crate::graph::{
        Edit, Link, LinkId, ObjectId, ObjectInfo, Patch, PatchEditor, PatchError, PinRef, Wire,
    };

    // Scheduling
    pub use crate::config::{AudioSettings, EngineConfig, EvaluationOrder};
    pub use crate::engine::{FrameReport, TickEngine};

    // Rendering
    pub use crate::render::{
        Canvas, DrawCommand, DrawList, LinkFrame, NullCanvas, ObjectFrame, RecordedObject,
        RecordingCanvas,
    };

    // Audio and background work
    pub use crate::audio::{
        AtomicF64, AudioBuffer, AudioEndpoint, AudioExchange, CaptureEndpoint, EndpointHandle,
        PlaybackEndpoint,
    };
    pub use crate::deferred::Deferred;

    // Built-in objects
    pub use crate::objects::{
        Add, AudioIn, AudioOut, Bang, Constant, Counter, Gate, Message, Multiply, Pack, Smooth,
        Spigot, TextFile,
    };

    // Serialization
    pub use crate::serialize::{
        LinkDef, ObjectDef, ObjectFactory, ObjectMetadata, ObjectRegistry, PatchDef,
    };

    // Visualization
    pub use crate::visual::{DotExporter, DotStyle};
}

// Re-export key types at crate root for convenience
pub use prelude::*;
