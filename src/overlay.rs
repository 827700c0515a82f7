//! Vector overlays for step annotations.
//!
//! Annotation geometry is stored in source screenshot pixels, so the overlay uses the
//! source size as its viewBox and can be stretched over the embedded image unchanged.

use crate::guides::Annotation;
use serde::Deserialize;
use std::fmt::Write as _;
use tracing::warn;

const DEFAULT_COLOR: &str = "#e53935";
const DEFAULT_STROKE: f64 = 4.0;
const HIGHLIGHT_COLOR: &str = "#ffeb3b";
const REDACT_COLOR: &str = "#333333";

#[derive(Debug, Deserialize)]
struct BoxGeometry {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    color: Option<String>,
    stroke_width: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LineGeometry {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    color: Option<String>,
    stroke_width: Option<f64>,
}

#[derive(Debug)]
enum Shape {
    Rectangle(BoxGeometry),
    Ellipse(BoxGeometry),
    Arrow(LineGeometry),
    Highlight(BoxGeometry),
    Redact(BoxGeometry),
}

impl BoxGeometry {
    fn is_drawable(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

impl LineGeometry {
    fn is_drawable(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
            && (self.x1 != self.x2 || self.y1 != self.y2)
    }
}

fn parse_shape(annotation: &Annotation) -> Option<Shape> {
    let data = annotation.data.clone();
    let boxed = |data| serde_json::from_value::<BoxGeometry>(data).ok().filter(BoxGeometry::is_drawable);

    let shape = match annotation.kind.as_str() {
        "rectangle" | "rect" => boxed(data).map(Shape::Rectangle),
        "circle" | "ellipse" => boxed(data).map(Shape::Ellipse),
        "highlight" => boxed(data).map(Shape::Highlight),
        "blur" | "redact" => boxed(data).map(Shape::Redact),
        "arrow" => serde_json::from_value::<LineGeometry>(data)
            .ok()
            .filter(LineGeometry::is_drawable)
            .map(Shape::Arrow),
        _ => None,
    };

    if shape.is_none() {
        warn!(
            annotation_id = annotation.id,
            kind = %annotation.kind,
            "Skipping annotation with unsupported type or geometry"
        );
    }
    shape
}

/// Accepts `#rgb` and `#rrggbb`; anything else falls back to `default`.
fn color_or<'a>(color: &'a Option<String>, default: &'a str) -> &'a str {
    match color.as_deref() {
        Some(c)
            if (c.len() == 4 || c.len() == 7)
                && c.starts_with('#')
                && c[1..].chars().all(|ch| ch.is_ascii_hexdigit()) =>
        {
            c
        }
        _ => default,
    }
}

fn stroke_of(stroke_width: Option<f64>) -> f64 {
    stroke_width
        .filter(|w| w.is_finite() && *w > 0.0)
        .unwrap_or(DEFAULT_STROKE)
}

fn write_shape(svg: &mut String, shape: &Shape) {
    // Writing into a String cannot fail.
    let _ = match shape {
        Shape::Rectangle(b) => write!(
            svg,
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="{}" stroke-width="{}"/>"#,
            b.x,
            b.y,
            b.width,
            b.height,
            color_or(&b.color, DEFAULT_COLOR),
            stroke_of(b.stroke_width)
        ),
        Shape::Ellipse(b) => write!(
            svg,
            r#"<ellipse cx="{}" cy="{}" rx="{}" ry="{}" fill="none" stroke="{}" stroke-width="{}"/>"#,
            b.x + b.width / 2.0,
            b.y + b.height / 2.0,
            b.width / 2.0,
            b.height / 2.0,
            color_or(&b.color, DEFAULT_COLOR),
            stroke_of(b.stroke_width)
        ),
        Shape::Highlight(b) => write!(
            svg,
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" fill-opacity="0.35"/>"#,
            b.x,
            b.y,
            b.width,
            b.height,
            color_or(&b.color, HIGHLIGHT_COLOR)
        ),
        Shape::Redact(b) => write!(
            svg,
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}"/>"#,
            b.x, b.y, b.width, b.height, REDACT_COLOR
        ),
        Shape::Arrow(l) => {
            let color = color_or(&l.color, DEFAULT_COLOR);
            let stroke = stroke_of(l.stroke_width);
            let [(lx, ly), (rx, ry)] = arrow_head(l, stroke);
            write!(
                svg,
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{color}" stroke-width="{stroke}" stroke-linecap="round"/><polygon points="{},{} {},{} {},{}" fill="{color}"/>"#,
                l.x1, l.y1, l.x2, l.y2, l.x2, l.y2, lx, ly, rx, ry
            )
        }
    };
}

/// The two back corners of the arrowhead at (x2, y2).
fn arrow_head(line: &LineGeometry, stroke: f64) -> [(f64, f64); 2] {
    let length = (stroke * 4.0).max(12.0);
    let spread = 25f64.to_radians();
    let angle = (line.y2 - line.y1).atan2(line.x2 - line.x1);
    let corner = |offset: f64| {
        (
            line.x2 - length * (angle + offset).cos(),
            line.y2 - length * (angle + offset).sin(),
        )
    };
    [corner(spread), corner(-spread)]
}

/// SVG drawing every supported annotation, or `None` when nothing is drawable.
pub fn overlay_svg(annotations: &[&Annotation], source_width: u32, source_height: u32) -> Option<String> {
    let shapes: Vec<Shape> = annotations.iter().filter_map(|a| parse_shape(a)).collect();
    if shapes.is_empty() {
        return None;
    }

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = source_width,
        h = source_height
    );
    for shape in &shapes {
        write_shape(&mut svg, shape);
    }
    svg.push_str("</svg>");
    Some(svg)
}

/// Parses an overlay into a tree ready for PDF conversion.
pub fn parse_overlay(svg: &str) -> Result<usvg::Tree, usvg::Error> {
    usvg::Tree::from_str(svg, &usvg::Options::default())
}
