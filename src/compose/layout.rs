//! Block model, text wrapping and pagination.
//!
//! Units are PDF points with the origin at the bottom-left of the page.

use std::fmt;

pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;
pub const MARGIN_X: f32 = 72.0;
pub const MARGIN_TOP: f32 = 36.0;
pub const MARGIN_BOTTOM: f32 = 36.0;
pub const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN_X;

/// Display box for screenshots (5.5in x 4in).
pub const IMAGE_BOX_WIDTH: f32 = 396.0;
pub const IMAGE_BOX_HEIGHT: f32 = 288.0;

/// Largest scale applied to a screenshot; a 550 px image fills the box width.
pub const POINTS_PER_PIXEL: f32 = 0.72;

const LINE_SPACING: f32 = 1.2;

/// Average Helvetica advance width in em units, used for wrapping.
const REGULAR_GLYPH_WIDTH: f32 = 0.5;
const BOLD_GLYPH_WIDTH: f32 = 0.55;

const TOP: f32 = PAGE_HEIGHT - MARGIN_TOP;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    Title,
    Subtitle,
    StepHeading,
    Body,
    Notice,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleSpec {
    pub size: f32,
    pub bold: bool,
    pub color: [f32; 3],
    pub space_before: f32,
    pub space_after: f32,
}

const fn gray(level: f32) -> [f32; 3] {
    [level, level, level]
}

impl TextStyle {
    pub fn spec(self) -> StyleSpec {
        match self {
            TextStyle::Title => StyleSpec {
                size: 24.0,
                bold: true,
                color: gray(0.102),
                space_before: 0.0,
                space_after: 30.0,
            },
            TextStyle::Subtitle => StyleSpec {
                size: 12.0,
                bold: false,
                color: gray(0.4),
                space_before: 0.0,
                space_after: 20.0,
            },
            TextStyle::StepHeading => StyleSpec {
                size: 18.0,
                bold: true,
                color: [0.173, 0.243, 0.314],
                space_before: 20.0,
                space_after: 10.0,
            },
            TextStyle::Body => StyleSpec {
                size: 11.0,
                bold: false,
                color: gray(0.267),
                space_before: 0.0,
                space_after: 15.0,
            },
            TextStyle::Notice => StyleSpec {
                size: 10.0,
                bold: false,
                color: gray(0.0),
                space_before: 0.0,
                space_after: 6.0,
            },
        }
    }
}

/// A screenshot ready for embedding: baseline JPEG data plus an optional SVG overlay
/// whose viewBox covers the whole image.
#[derive(Clone)]
pub struct EmbeddedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub overlay: Option<String>,
}

impl fmt::Debug for EmbeddedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedImage")
            .field("jpeg_bytes", &self.jpeg.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("overlay", &self.overlay.is_some())
            .finish()
    }
}

impl EmbeddedImage {
    /// Size on the page: fits the display box, keeps the aspect ratio, never
    /// enlarges beyond [`POINTS_PER_PIXEL`].
    pub fn display_size(&self) -> (f32, f32) {
        let (w, h) = (self.width.max(1) as f32, self.height.max(1) as f32);
        let scale = (IMAGE_BOX_WIDTH / w)
            .min(IMAGE_BOX_HEIGHT / h)
            .min(POINTS_PER_PIXEL);
        (w * scale, h * scale)
    }
}

#[derive(Debug, Clone)]
pub enum Block {
    Text { style: TextStyle, text: String },
    Image(EmbeddedImage),
    Spacer(f32),
}

impl Block {
    pub fn text(style: TextStyle, text: impl Into<String>) -> Self {
        Block::Text {
            style,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PageItem {
    Line {
        style: TextStyle,
        text: String,
        x: f32,
        baseline: f32,
    },
    Image {
        image: EmbeddedImage,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<PageItem>,
}

/// Replaces anything the standard 14 fonts cannot show with `?` and folds
/// whitespace to spaces.
pub fn pdf_safe(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            c if c.is_whitespace() => ' ',
            ' '..='~' => c,
            _ => '?',
        })
        .collect()
}

/// Greedy word wrap on an average glyph width. Words longer than a line are split.
pub fn wrap_text(text: &str, size: f32, bold: bool, max_width: f32) -> Vec<String> {
    let glyph = if bold { BOLD_GLYPH_WIDTH } else { REGULAR_GLYPH_WIDTH };
    let max_chars = ((max_width / (size * glyph)).floor() as usize).max(1);

    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut rest: Vec<char> = word.chars().collect();
        while rest.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(rest.drain(..max_chars).collect());
        }
        let word: String = rest.into_iter().collect();
        if word.is_empty() {
            continue;
        }
        if current.is_empty() {
            current = word;
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut current, word));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

struct Paginator {
    pages: Vec<Page>,
    current: Page,
    y: f32,
}

impl Paginator {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Page::default(),
            y: TOP,
        }
    }

    fn remaining(&self) -> f32 {
        self.y - MARGIN_BOTTOM
    }

    fn at_top(&self) -> bool {
        self.current.items.is_empty()
    }

    fn break_page(&mut self) {
        if !self.current.items.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
        }
        self.y = TOP;
    }

    fn ensure(&mut self, height: f32) {
        if self.remaining() < height {
            self.break_page();
        }
    }

    fn text(&mut self, style: TextStyle, text: &str) {
        let spec = style.spec();
        let lines = wrap_text(text, spec.size, spec.bold, CONTENT_WIDTH);
        if lines.is_empty() {
            return;
        }
        if !self.at_top() {
            self.y -= spec.space_before;
        }
        let line_height = spec.size * LINE_SPACING;
        for line in lines {
            self.ensure(line_height);
            self.current.items.push(PageItem::Line {
                style,
                text: line,
                x: MARGIN_X,
                baseline: self.y - spec.size,
            });
            self.y -= line_height;
        }
        self.y -= spec.space_after;
    }

    fn image(&mut self, image: EmbeddedImage) {
        let (width, height) = image.display_size();
        self.ensure(height);
        let y = self.y - height;
        self.current.items.push(PageItem::Image {
            image,
            x: MARGIN_X,
            y,
            width,
            height,
        });
        self.y = y;
    }

    fn spacer(&mut self, height: f32) {
        if !self.at_top() {
            self.y -= height;
        }
    }

    fn finish(mut self) -> Vec<Page> {
        self.break_page();
        if self.pages.is_empty() {
            self.pages.push(Page::default());
        }
        self.pages
    }
}

/// Flows blocks top to bottom, starting a new page whenever the next line or image
/// would cross the bottom margin. Block order is preserved and nothing is dropped
/// except spacers at the top of a page.
pub fn paginate(blocks: Vec<Block>) -> Vec<Page> {
    let mut paginator = Paginator::new();
    for block in blocks {
        match block {
            Block::Text { style, text } => paginator.text(style, &text),
            Block::Image(image) => paginator.image(image),
            Block::Spacer(height) => paginator.spacer(height),
        }
    }
    paginator.finish()
}
