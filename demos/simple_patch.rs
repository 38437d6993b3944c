//! Simple Patch Example
//!
//! Builds a small counting patch, edits it from a "UI" thread while it runs,
//! draws it onto a recording canvas and saves it as JSON.
//!
//! Run with: cargo run --example simple_patch
//! Set RUST_LOG=trellis=debug to see structural edits.

use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;
use trellis::prelude::*;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::default();
    let registry = Arc::new(ObjectRegistry::new());
    let mut patch = Patch::with_registry(registry, &config);

    // Add objects
    let one = patch.create_object("constant", (20.0, 20.0)).unwrap();
    let acc = patch.create_object("add", (140.0, 20.0)).unwrap();
    let bang = patch.create_object("bang", (260.0, 20.0)).unwrap();
    let counter = patch.create_object("counter", (380.0, 20.0)).unwrap();
    patch.set_custom_var(one, "value", 1.0);

    // Make connections
    // 1 -> accumulator, accumulator -> itself (one frame per hop)
    patch.connect(one, 0, acc, 0).unwrap();
    patch.connect(acc, 0, acc, 1).unwrap();
    // 1 -> bang -> counter
    patch.connect(one, 0, bang, 0).unwrap();
    patch.connect(bang, 0, counter, 0).unwrap();

    let mut engine = TickEngine::new(&config);
    let mut canvas = RecordingCanvas::new();

    println!("Running 5 frames...");
    for _ in 0..5 {
        canvas.clear();
        let report = engine.tick(&mut patch, &mut canvas);
        println!(
            "frame {}: ticked {}, acc = {:?}, counter = {:?}",
            report.frame,
            report.ticked,
            patch.outlet_value(acc, 0),
            patch.outlet_value(counter, 0),
        );
    }

    // Edit from another thread; applied at the next snapshot
    let mut editor = patch.editor();
    thread::spawn(move || {
        editor.create_object("multiply", (140.0, 120.0)).ok();
        editor.remove_object(bang).ok();
    })
    .join()
    .ok();

    canvas.clear();
    let report = engine.tick(&mut patch, &mut canvas);
    println!(
        "frame {}: {} editor edits, {} links purged, {} erased",
        report.frame, report.editor_edits, report.links_purged, report.erased
    );

    println!("\nCanvas:");
    for object in &canvas.objects {
        println!("  {:<10} at {:?}: {:?}", object.name, object.position, object.commands);
    }

    println!("\nDOT:\n{}", DotExporter::export(&patch, &DotStyle::light()));

    match patch.to_def("counting").to_json() {
        Ok(json) => println!("Saved patch:\n{}", json),
        Err(e) => eprintln!("save failed: {}", e),
    }
}
