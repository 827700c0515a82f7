//! PDF serialisation of laid-out pages.
//!
//! Text uses the built-in Helvetica faces so no font data is embedded. Screenshots are
//! DCT image XObjects; annotation overlays go through svg2pdf and are drawn over the
//! screenshot with the same transform.

use crate::compose::layout::{Page, PageItem, PAGE_HEIGHT, PAGE_WIDTH};
use crate::overlay::parse_overlay;
use pdf_writer::{Chunk, Content, Filter, Finish, Name, Pdf, Rect, Ref, Str, TextStr};
use std::collections::HashMap;
use tracing::{info, warn};

const REGULAR_FONT: Name<'static> = Name(b"F1");
const BOLD_FONT: Name<'static> = Name(b"F2");

/// Serialises `pages` into a complete PDF document.
pub fn render_pdf(pages: &[Page], title: &str) -> Vec<u8> {
    let mut alloc = Ref::new(1);
    let catalog_id = alloc.bump();
    let tree_id = alloc.bump();
    let info_id = alloc.bump();
    let regular_id = alloc.bump();
    let bold_id = alloc.bump();
    let page_ids: Vec<Ref> = pages.iter().map(|_| alloc.bump()).collect();

    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(tree_id);
    pdf.pages(tree_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);
    pdf.document_info(info_id)
        .title(TextStr(title))
        .producer(TextStr("SnapStep"));
    pdf.type1_font(regular_id).base_font(Name(b"Helvetica"));
    pdf.type1_font(bold_id).base_font(Name(b"Helvetica-Bold"));

    for (page, &page_id) in pages.iter().zip(&page_ids) {
        let content_id = alloc.bump();
        let mut content = Content::new();
        let mut xobjects: Vec<(String, Ref)> = Vec::new();

        for item in &page.items {
            match item {
                PageItem::Line {
                    style,
                    text,
                    x,
                    baseline,
                } => {
                    let spec = style.spec();
                    let [r, g, b] = spec.color;
                    content.set_fill_rgb(r, g, b);
                    content.begin_text();
                    content.set_font(if spec.bold { BOLD_FONT } else { REGULAR_FONT }, spec.size);
                    content.next_line(*x, *baseline);
                    content.show(Str(text.as_bytes()));
                    content.end_text();
                }
                PageItem::Image {
                    image,
                    x,
                    y,
                    width,
                    height,
                } => {
                    let placement = [*width, 0.0, 0.0, *height, *x, *y];

                    let image_id = alloc.bump();
                    let mut xobject = pdf.image_xobject(image_id, &image.jpeg);
                    xobject.filter(Filter::DctDecode);
                    xobject.width(image.width as i32);
                    xobject.height(image.height as i32);
                    xobject.color_space().device_rgb();
                    xobject.bits_per_component(8);
                    xobject.finish();

                    let name = format!("Im{}", xobjects.len() + 1);
                    draw_xobject(&mut content, &name, placement);
                    xobjects.push((name, image_id));

                    if let Some(svg) = &image.overlay {
                        if let Some((chunk, overlay_id)) = overlay_chunk(svg, &mut alloc) {
                            pdf.extend(&chunk);
                            let name = format!("Ov{}", xobjects.len() + 1);
                            draw_xobject(&mut content, &name, placement);
                            xobjects.push((name, overlay_id));
                        }
                    }
                }
            }
        }

        pdf.stream(content_id, &content.finish());

        let mut page_writer = pdf.page(page_id);
        page_writer.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
        page_writer.parent(tree_id);
        page_writer.contents(content_id);
        let mut resources = page_writer.resources();
        resources
            .fonts()
            .pair(REGULAR_FONT, regular_id)
            .pair(BOLD_FONT, bold_id);
        let mut objects = resources.x_objects();
        for (name, id) in &xobjects {
            objects.pair(Name(name.as_bytes()), *id);
        }
        objects.finish();
        resources.finish();
        page_writer.finish();
    }

    let bytes = pdf.finish();
    info!("PDF render complete: {} pages, {} bytes", pages.len(), bytes.len());
    bytes
}

fn draw_xobject(content: &mut Content, name: &str, placement: [f32; 6]) {
    content.save_state();
    content.transform(placement);
    content.x_object(Name(name.as_bytes()));
    content.restore_state();
}

/// Converts an overlay SVG into a unit-square form XObject renumbered into this
/// document. A malformed overlay is skipped.
fn overlay_chunk(svg: &str, alloc: &mut Ref) -> Option<(Chunk, Ref)> {
    let tree = match parse_overlay(svg) {
        Ok(tree) => tree,
        Err(err) => {
            warn!(error = %err, "Dropping annotation overlay that failed to parse");
            return None;
        }
    };

    let (chunk, root) = svg2pdf::to_chunk(&tree, svg2pdf::ConversionOptions::default());
    let mut map = HashMap::new();
    let chunk = chunk.renumber(|old| *map.entry(old).or_insert_with(|| alloc.bump()));
    let root = map.get(&root).copied()?;
    Some((chunk, root))
}
