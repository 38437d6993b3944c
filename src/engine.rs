//! Frame Scheduler
//!
//! [`TickEngine`] advances a [`Patch`] one frame at a time. Each frame runs
//! five phases in a fixed order:
//!
//! 1. **Snapshot**: fold in editor edits, purge stale links, list live objects
//! 2. **Propagation**: copy last frame's outlet values along enabled links
//! 3. **Update**: `on_tick` every live, non-faulted object
//! 4. **Render**: `render` every live object and hand the result to the canvas
//! 5. **Garbage**: apply object-issued edits, erase removal-marked objects
//!
//! Objects only read their inlet snapshot and only write their own outlets,
//! so the update order cannot change the result. [`EvaluationOrder::Shuffled`]
//! exists to check exactly that.

use crate::config::{EngineConfig, EvaluationOrder};
use crate::graph::{ObjectId, Outcome, Patch};
use crate::object::ObjectFault;
use crate::render::{Canvas, NullCanvas};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{trace, trace_span};

/// What happened during one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// Edits folded in from editors during the snapshot
    pub editor_edits: usize,
    pub links_purged: usize,
    /// Values copied along links during propagation
    pub values_delivered: usize,
    pub ticked: usize,
    pub rendered: usize,
    pub links_drawn: usize,
    /// Objects that faulted this frame, in either update or render
    pub faults: Vec<(ObjectId, ObjectFault)>,
    /// Edits objects queued through their tick context
    pub object_edits: usize,
    pub erased: usize,
}

impl FrameReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Drives a patch frame by frame
pub struct TickEngine {
    order: EvaluationOrder,
    rng: Option<StdRng>,
    frame: u64,
}

impl TickEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let rng = match config.order {
            EvaluationOrder::Stable => None,
            EvaluationOrder::Shuffled { seed } => Some(StdRng::seed_from_u64(seed)),
        };
        Self {
            order: config.order,
            rng,
            frame: 0,
        }
    }

    /// Number of frames run so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn order(&self) -> EvaluationOrder {
        self.order
    }

    /// Run one frame, drawing onto `canvas`
    pub fn tick(&mut self, patch: &mut Patch, canvas: &mut dyn Canvas) -> FrameReport {
        let frame = self.frame;
        let span = trace_span!("frame", frame);
        let _enter = span.enter();

        let mut report = FrameReport {
            frame,
            ..Default::default()
        };

        // Snapshot
        report.editor_edits = patch.drain_editors();
        report.links_purged = patch.purge_stale_links();
        let live = patch.live_ids();

        // Propagation
        report.values_delivered = patch.propagate(&live);

        // Update
        let mut update_order = live.clone();
        if let Some(rng) = self.rng.as_mut() {
            update_order.shuffle(rng);
        }
        for &id in &update_order {
            match patch.tick_object(id, frame) {
                Outcome::Done => report.ticked += 1,
                Outcome::Faulted(fault) => report.faults.push((id, fault)),
                Outcome::Skipped => {}
            }
        }

        // Render, links underneath objects
        report.links_drawn = patch.render_links(canvas);
        for &id in &live {
            match patch.render_object(id, canvas) {
                Outcome::Done => report.rendered += 1,
                Outcome::Faulted(fault) => {
                    report.rendered += 1;
                    report.faults.push((id, fault));
                }
                Outcome::Skipped => {}
            }
        }

        // Garbage
        report.object_edits = patch.apply_deferred();
        report.erased = patch.collect_garbage();

        trace!(
            ticked = report.ticked,
            faults = report.faults.len(),
            erased = report.erased,
            "frame complete"
        );
        self.frame += 1;
        report
    }

    /// Run one frame without a canvas
    pub fn tick_headless(&mut self, patch: &mut Patch) -> FrameReport {
        self.tick(patch, &mut NullCanvas)
    }

    /// Run `frames` headless frames and return the last report
    pub fn run(&mut self, patch: &mut Patch, frames: usize) -> Option<FrameReport> {
        (0..frames).map(|_| self.tick_headless(patch)).last()
    }
}

impl Default for TickEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Add, Constant, Stub};
    use crate::pin::{PinKind, PinValue};
    use crate::render::RecordingCanvas;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_add_constant_scenario() {
        let mut patch = Patch::new();
        let five = patch.add_object("five", Constant::new(5.0));
        let three = patch.add_object("three", Constant::new(3.0));
        let add = patch.add_object("add", Add::new());
        patch.connect(five, 0, add, 0).unwrap();
        patch.connect(three, 0, add, 1).unwrap();

        let mut engine = TickEngine::default();
        let report = engine.tick_headless(&mut patch);
        assert_eq!(report.frame, 0);
        assert_eq!(report.ticked, 3);
        assert_eq!(report.values_delivered, 2);
        assert_eq!(patch.outlet_value(add, 0), Some(&PinValue::Numeric(8.0)));
    }

    #[test]
    fn test_one_frame_latency_per_hop() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(2.0));
        let first = patch.add_object("first", Add::new());
        let second = patch.add_object("second", Add::new());
        patch.connect(c, 0, first, 0).unwrap();
        patch.connect(first, 0, second, 0).unwrap();

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(first, 0), Some(&PinValue::Numeric(2.0)));
        assert_eq!(patch.outlet_value(second, 0), Some(&PinValue::Numeric(0.0)));

        engine.tick_headless(&mut patch);
        assert_eq!(patch.outlet_value(second, 0), Some(&PinValue::Numeric(2.0)));
    }

    #[test]
    fn test_unconnected_inlets_read_sentinels() {
        let mut patch = Patch::new();
        let stub = patch.add_object(
            "stub",
            Stub::new(&[PinKind::Numeric, PinKind::String, PinKind::Texture], &[]),
        );

        let mut engine = TickEngine::default();
        engine.tick_headless(&mut patch);
        assert_eq!(patch.inlet_value(stub, 0), Some(&PinValue::Numeric(0.0)));
        assert!(patch.inlet_value(stub, 1).unwrap().is_empty());
        assert!(patch.inlet_value(stub, 2).unwrap().is_empty());
    }

    #[test]
    fn test_fault_freezes_object_until_cleared() {
        let mut patch = Patch::new();
        let healthy = Stub::new(&[], &[]);
        let ticks = healthy.ticks();
        patch.add_object("healthy", healthy);
        let failing = patch.add_object("failing", Stub::failing_after(1));

        let mut engine = TickEngine::default();
        let report = engine.tick_headless(&mut patch);
        assert!(report.is_clean());

        let report = engine.tick_headless(&mut patch);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].0, failing);
        assert!(patch.object(failing).unwrap().is_faulted());
        // Siblings keep running in the same frame
        assert_eq!(report.ticked, 1);

        let report = engine.tick_headless(&mut patch);
        assert!(report.is_clean());
        assert_eq!(report.ticked, 1);
        assert_eq!(ticks.load(Ordering::Relaxed), 3);

        assert!(patch.clear_fault(failing));
        assert!(!patch.clear_fault(failing));
        let report = engine.tick_headless(&mut patch);
        assert_eq!(report.ticked, 1);
        assert_eq!(report.faults.len(), 1);
    }

    #[test]
    fn test_faulted_object_is_still_drawn() {
        let mut patch = Patch::new();
        let failing = patch.add_object("failing", Stub::failing_after(0));

        let mut engine = TickEngine::default();
        let mut canvas = RecordingCanvas::new();
        let report = engine.tick(&mut patch, &mut canvas);

        assert_eq!(report.rendered, 1);
        let drawn = canvas.object(failing).unwrap();
        assert!(drawn.faulted);
        assert!(drawn.commands.is_empty());
    }

    #[test]
    fn test_removed_object_is_erased_at_end_of_next_frame() {
        let mut patch = Patch::new();
        let c = patch.add_object("c", Constant::new(1.0));
        let a = patch.add_object("a", Add::new());
        patch.connect(c, 0, a, 0).unwrap();

        patch.remove_object(c);
        let mut engine = TickEngine::default();
        let report = engine.tick_headless(&mut patch);

        assert_eq!(report.links_purged, 1);
        assert_eq!(report.ticked, 1);
        assert_eq!(report.erased, 1);
        assert!(!patch.contains(c));
        assert_eq!(patch.link_count(), 0);
    }

    #[test]
    fn test_frame_counter_advances() {
        let mut patch = Patch::new();
        let mut engine = TickEngine::default();
        let last = engine.run(&mut patch, 4).unwrap();
        assert_eq!(last.frame, 3);
        assert_eq!(engine.frame(), 4);
        assert!(engine.run(&mut patch, 0).is_none());
    }

    #[test]
    fn test_shuffled_engine_is_seeded() {
        let config = EngineConfig::default().with_order(EvaluationOrder::Shuffled { seed: 9 });
        let engine = TickEngine::new(&config);
        assert_eq!(engine.order(), EvaluationOrder::Shuffled { seed: 9 });
        assert!(engine.rng.is_some());
    }
}
