//! Patch Visualization
//!
//! DOT/GraphViz export of a patch, for debugging connectivity outside the
//! canvas.

use crate::graph::Patch;
use crate::pin::{PinKind, PinSpec};
use std::fmt::Write;

/// Style options for DOT graph export
#[derive(Debug, Clone)]
pub struct DotStyle {
    /// Graph direction: "TB" (top-bottom), "LR" (left-right), "BT", "RL"
    pub rankdir: String,
    /// Node shape for objects
    pub node_shape: String,
    pub font_name: String,
    pub font_size: u32,
    /// Whether to show pin labels on edges
    pub show_pin_labels: bool,
    /// Whether to color-code edges by pin kind
    pub color_by_kind: bool,
    pub bg_color: String,
    pub node_color: String,
    pub edge_color: String,
    /// Border color of faulted objects
    pub fault_color: String,
}

impl Default for DotStyle {
    fn default() -> Self {
        Self {
            rankdir: "LR".to_string(),
            node_shape: "box".to_string(),
            font_name: "Helvetica".to_string(),
            font_size: 12,
            show_pin_labels: true,
            color_by_kind: true,
            bg_color: "#1a1a2e".to_string(),
            node_color: "#16213e".to_string(),
            edge_color: "#e94560".to_string(),
            fault_color: "#ff0000".to_string(),
        }
    }
}

impl DotStyle {
    /// Create a light theme style
    pub fn light() -> Self {
        Self {
            bg_color: "#ffffff".to_string(),
            node_color: "#f0f0f0".to_string(),
            edge_color: "#333333".to_string(),
            ..Default::default()
        }
    }

    /// Create a minimal style
    pub fn minimal() -> Self {
        Self {
            show_pin_labels: false,
            color_by_kind: false,
            node_shape: "ellipse".to_string(),
            ..Default::default()
        }
    }

    pub fn with_rankdir(mut self, dir: impl Into<String>) -> Self {
        self.rankdir = dir.into();
        self
    }

    pub fn with_node_shape(mut self, shape: impl Into<String>) -> Self {
        self.node_shape = shape.into();
        self
    }
}

/// DOT/GraphViz exporter for patches
pub struct DotExporter;

impl DotExporter {
    /// Export the live part of a patch to DOT format
    pub fn export(patch: &Patch, style: &DotStyle) -> String {
        let mut dot = String::new();

        // Writing into a String cannot fail
        let _ = Self::write_dot(&mut dot, patch, style);
        dot
    }

    /// Export a patch to DOT format with default style
    pub fn export_default(patch: &Patch) -> String {
        Self::export(patch, &DotStyle::default())
    }

    fn write_dot(dot: &mut String, patch: &Patch, style: &DotStyle) -> std::fmt::Result {
        writeln!(dot, "digraph patch {{")?;
        writeln!(dot, "    rankdir={};", style.rankdir)?;
        writeln!(dot, "    bgcolor=\"{}\";", style.bg_color)?;
        writeln!(
            dot,
            "    node [shape={}, style=filled, fillcolor=\"{}\", fontname=\"{}\", fontsize={}];",
            style.node_shape, style.node_color, style.font_name, style.font_size
        )?;
        writeln!(
            dot,
            "    edge [color=\"{}\", fontname=\"{}\", fontsize={}];",
            style.edge_color,
            style.font_name,
            style.font_size.saturating_sub(2)
        )?;
        dot.push('\n');

        for info in patch.objects().filter(|o| o.is_live()) {
            let Some(pins) = patch.pins(info.id) else {
                continue;
            };
            let label = Self::create_node_label(&info.name, &info.type_name, pins);
            let fault = if info.is_faulted() {
                format!(", color=\"{}\", penwidth=2", style.fault_color)
            } else {
                String::new()
            };
            writeln!(
                dot,
                "    \"n{}\" [label=<{}>{}];",
                info.id.as_u64(),
                label,
                fault
            )?;
        }

        dot.push('\n');

        for link in patch.links() {
            if !(patch.is_live(link.from.object) && patch.is_live(link.to.object)) {
                continue;
            }

            let mut edge_attrs = Vec::new();

            if style.show_pin_labels {
                let from_pin = Self::pin_label(patch.pins(link.from.object), link.from.pin, false);
                let to_pin = Self::pin_label(patch.pins(link.to.object), link.to.pin, true);
                edge_attrs.push(format!("label=\"{}→{}\"", from_pin, to_pin));
            }

            if style.color_by_kind {
                edge_attrs.push(format!("color=\"{}\"", Self::kind_color(link.kind)));
            }

            if !link.enabled {
                edge_attrs.push("style=dashed".to_string());
            }

            let attrs = if edge_attrs.is_empty() {
                String::new()
            } else {
                format!(" [{}]", edge_attrs.join(", "))
            };

            writeln!(
                dot,
                "    \"n{}\" -> \"n{}\"{};",
                link.from.object.as_u64(),
                link.to.object.as_u64(),
                attrs
            )?;
        }

        writeln!(dot, "}}")
    }

    fn create_node_label(name: &str, type_name: &str, pins: &PinSpec) -> String {
        let mut label = String::new();

        // HTML-like label
        label.push_str("<TABLE BORDER=\"0\" CELLBORDER=\"1\" CELLSPACING=\"0\">");
        label.push_str(&format!(
            "<TR><TD COLSPAN=\"2\"><B>{}</B><BR/><FONT POINT-SIZE=\"10\">{}</FONT></TD></TR>",
            escape_html(name),
            escape_html(type_name)
        ));

        if !pins.inlets.is_empty() || !pins.outlets.is_empty() {
            label.push_str("<TR><TD ALIGN=\"LEFT\">");
            for inlet in &pins.inlets {
                label.push_str(&format!("→ {}<BR/>", escape_html(&inlet.label)));
            }
            if pins.inlets.is_empty() {
                label.push(' ');
            }
            label.push_str("</TD><TD ALIGN=\"RIGHT\">");
            for outlet in &pins.outlets {
                label.push_str(&format!("{} →<BR/>", escape_html(&outlet.label)));
            }
            if pins.outlets.is_empty() {
                label.push(' ');
            }
            label.push_str("</TD></TR>");
        }

        label.push_str("</TABLE>");
        label
    }

    fn pin_label(pins: Option<&PinSpec>, index: usize, inlet: bool) -> String {
        pins.and_then(|p| {
            let list = if inlet { &p.inlets } else { &p.outlets };
            list.get(index).map(|d| d.label.clone())
        })
        .unwrap_or_else(|| format!("pin_{}", index))
    }

    fn kind_color(kind: PinKind) -> &'static str {
        match kind {
            PinKind::Numeric => "#90be6d", // Green
            PinKind::String => "#f9c74f",  // Yellow
            PinKind::Array => "#00b4d8",   // Cyan
            PinKind::Texture => "#9d4edd", // Purple
            PinKind::Audio => "#e94560",   // Red
            PinKind::Pixels => "#f8961e",  // Orange
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
