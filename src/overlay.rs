//! Highlight overlay for one rendered page.
//!
//! The overlay never paints inside an event handler. Changes mark it dirty
//! and request a single animation frame; the paint happens when the host
//! delivers that frame.

use tracing::{debug, trace};

use crate::config::OverlayConfig;
use crate::document_model::{BBox, Block, BlockIndex, ViewKind};
use crate::geometry::{self, DisplaySize, Padding, Point, Rotation};
use crate::registry::{color_scheme, BlockRegistry, Rgba};
use crate::sync::SyncStore;
use crate::timing::{FrameHandle, FrameScheduler};

/// Draw surface supplied by the host (canvas 2D context, egui painter, ...).
pub trait Painter {
    fn resize(&mut self, size: DisplaySize);
    fn clear(&mut self);
    fn fill_rect(&mut self, rect: &BBox, color: Rgba);
    fn stroke_rect(&mut self, rect: &BBox, color: Rgba, width: f64);
}

/// Display rectangle of a block with hit padding applied. Painting and
/// hit-testing both go through here.
pub fn padded_block_rect(block: &Block, canvas: &DisplaySize, rotation: Rotation, padding: Padding) -> BBox {
    let display = geometry::page_to_display(&block.bbox, &block.page_size, canvas, rotation);
    geometry::padded(&display, padding)
}

/// First block in reading order on `page_num` whose padded rectangle
/// contains a canvas point.
pub fn block_under(
    registry: &BlockRegistry,
    page_num: usize,
    canvas: &DisplaySize,
    rotation: Rotation,
    padding: Padding,
    point: Point,
) -> Option<BlockIndex> {
    if canvas.is_empty() {
        return None;
    }
    registry
        .by_page(page_num)
        .into_iter()
        .find(|block| padded_block_rect(block, canvas, rotation, padding).contains(point.x, point.y))
        .map(|block| block.index)
}

pub struct OverlayRenderer {
    view: ViewKind,
    page_num: usize,
    canvas: DisplaySize,
    css: DisplaySize,
    rotation: Rotation,
    padding: Padding,
    config: OverlayConfig,
    painter: Box<dyn Painter>,
    dirty: bool,
    pending: Option<FrameHandle>,
}

impl OverlayRenderer {
    pub fn new(view: ViewKind, page_num: usize, config: OverlayConfig, painter: Box<dyn Painter>) -> Self {
        Self {
            view,
            page_num,
            canvas: DisplaySize::new(0.0, 0.0),
            css: DisplaySize::new(0.0, 0.0),
            rotation: Rotation::R0,
            padding: Padding::with_ratio(config.hit_padding_px, config.leading_padding_ratio),
            config,
            painter,
            dirty: false,
            pending: None,
        }
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn page_num(&self) -> usize {
        self.page_num
    }

    pub fn canvas_size(&self) -> DisplaySize {
        self.canvas
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pending_frame(&self) -> Option<FrameHandle> {
        self.pending
    }

    /// Update the surface geometry after a zoom, resize or rotate. The
    /// canvas is sized to the displayed page, not its natural pixel size;
    /// `css` is the element's layout box.
    pub fn set_geometry(
        &mut self,
        canvas: DisplaySize,
        css: DisplaySize,
        rotation: Rotation,
        scheduler: &mut dyn FrameScheduler,
    ) {
        if self.canvas == canvas && self.css == css && self.rotation == rotation {
            return;
        }
        self.canvas = canvas;
        self.css = css;
        self.rotation = rotation;
        self.invalidate(scheduler);
    }

    /// Mark dirty and make sure exactly one frame is queued.
    pub fn invalidate(&mut self, scheduler: &mut dyn FrameScheduler) {
        self.dirty = true;
        if self.pending.is_none() {
            self.pending = Some(scheduler.request_frame());
        }
    }

    /// Drop the queued frame. Used on document switch so nothing is painted
    /// with the old document's blocks.
    pub fn cancel(&mut self, scheduler: &mut dyn FrameScheduler) {
        if let Some(handle) = self.pending.take() {
            scheduler.cancel_frame(handle);
        }
        self.dirty = false;
    }

    /// Frame callback. Returns the number of blocks painted, or `None` when
    /// the frame was not ours or there was nothing to do.
    pub fn on_frame(&mut self, handle: FrameHandle, store: &SyncStore) -> Option<usize> {
        if self.pending != Some(handle) {
            return None;
        }
        self.pending = None;
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.paint(store))
    }

    /// Repaint from the store. Only notable blocks are drawn, later blocks
    /// over earlier ones.
    pub fn paint(&mut self, store: &SyncStore) -> usize {
        self.painter.resize(self.canvas);
        self.painter.clear();
        if self.canvas.is_empty() {
            return 0;
        }

        let registry = store.registry();
        let mut notable: Vec<&Block> = registry
            .by_page(self.page_num)
            .into_iter()
            .filter(|b| store.is_notable(b.index))
            .collect();
        notable.sort_by(|a, b| b.index.cmp(&a.index));

        let mut painted = 0;
        for block in notable {
            let rect = self.padded_rect(block);
            if !self.on_canvas(&rect) {
                trace!("Block {} is off canvas on page {}", block.index, self.page_num);
                continue;
            }
            let scheme = color_scheme(block.block_type);
            let width = if store.is_selected(block.index) {
                self.config.selected_stroke_width
            } else {
                self.config.hover_stroke_width
            };
            self.painter.fill_rect(&rect, scheme.background);
            self.painter.stroke_rect(&rect, scheme.border, width);
            painted += 1;
        }
        debug!(
            "Painted {} blocks on {:?} page {}",
            painted, self.view, self.page_num
        );
        painted
    }

    pub fn padded_rect(&self, block: &Block) -> BBox {
        padded_block_rect(block, &self.canvas, self.rotation, self.padding)
    }

    fn on_canvas(&self, rect: &BBox) -> bool {
        rect.x2 >= 0.0 && rect.y2 >= 0.0 && rect.x1 <= self.canvas.width && rect.y1 <= self.canvas.height
    }

    /// First block in reading order under a canvas point.
    pub fn hit_test_point(&self, registry: &BlockRegistry, point: Point) -> Option<BlockIndex> {
        block_under(registry, self.page_num, &self.canvas, self.rotation, self.padding, point)
    }

    pub fn pointer_to_canvas(&self, client: Point, element_origin: Point) -> Point {
        geometry::client_to_canvas(client, element_origin, &self.css, &self.canvas)
    }

    /// Canvas point back to unrotated page units.
    pub fn canvas_to_page(&self, registry: &BlockRegistry, point: Point) -> Option<Point> {
        let page_size = registry.page_size(self.page_num)?;
        if self.canvas.is_empty() {
            return None;
        }
        let norm = geometry::point_from_display(point, &self.canvas, self.rotation);
        Some(Point::new(norm.x * page_size.width, norm.y * page_size.height))
    }

    pub fn block_at(&self, registry: &BlockRegistry, client: Point, element_origin: Point) -> Option<BlockIndex> {
        self.hit_test_point(registry, self.pointer_to_canvas(client, element_origin))
    }

    /// Click on the overlay. A miss clears the selection.
    pub fn handle_pointer_click(&self, store: &mut SyncStore, client: Point, element_origin: Point) -> Option<BlockIndex> {
        let hit = self.block_at(store.registry(), client, element_origin);
        store.handle_click(self.view, hit, self.page_num);
        hit
    }

    pub fn handle_pointer_move(&self, store: &mut SyncStore, client: Point, element_origin: Point) -> Option<BlockIndex> {
        let hit = self.block_at(store.registry(), client, element_origin);
        store.handle_hover(self.view, hit, self.page_num);
        hit
    }

    pub fn handle_pointer_leave(&self, store: &mut SyncStore) {
        store.handle_hover(self.view, None, self.page_num);
    }
}
