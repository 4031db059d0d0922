use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

use crate::config::ScrollConfig;
use crate::document_model::{Block, BlockIndex, MatchResult, ViewKind};
use crate::geometry::{self, DisplaySize, Rotation};
use crate::matcher::index_matches;
use crate::registry::BlockRegistry;
use crate::sync::{SyncChange, SyncState};
use crate::timing::{Clock, Deadline, Debouncer};

/// Where a page sits inside a scroll container, in display pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: Rotation,
}

impl PageFrame {
    pub fn new(top: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            width,
            height,
            rotation: Rotation::R0,
        }
    }
}

/// Scrollable container handle supplied by the host UI.
///
/// Only the first four methods are required. A page view implements
/// `page_frame`; a text view implements `block_anchor` and/or
/// `section_anchor`.
pub trait ScrollViewport {
    fn scroll_top(&self) -> f64;
    fn scroll_height(&self) -> f64;
    fn client_height(&self) -> f64;
    fn set_scroll_top(&mut self, top: f64);

    /// Toggle the marker that disables smooth-scroll transitions.
    fn set_instant(&mut self, _instant: bool) {}

    fn page_frame(&self, _page_num: usize) -> Option<PageFrame> {
        None
    }

    /// Offset of the node tagged with this block index, if the view has one.
    fn block_anchor(&self, _index: BlockIndex) -> Option<f64> {
        None
    }

    /// Offset of the n-th rendered section.
    fn section_anchor(&self, _section_index: usize) -> Option<f64> {
        None
    }
}

fn max_scroll(viewport: &dyn ScrollViewport) -> f64 {
    (viewport.scroll_height() - viewport.client_height()).max(0.0)
}

/// Who started the sync action that is currently settling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    View(ViewKind),
    /// Selection made by the host itself (search, keyboard); every view was
    /// scrolled
    Host,
}

/// Scrolls the other views to a newly selected block and mirrors user
/// scrolling between views, without letting the resulting scroll events
/// bounce back.
///
/// Every failure (missing viewport, unknown block, zero-size viewport) is a
/// silent no-op.
pub struct ScrollController {
    config: ScrollConfig,
    enabled: bool,
    clock: Rc<dyn Clock>,
    registry: Rc<BlockRegistry>,
    matches: HashMap<BlockIndex, MatchResult>,
    viewports: BTreeMap<ViewKind, Box<dyn ScrollViewport>>,
    last_source: Option<SyncSource>,
    settle: Deadline,
    pending_scroll: Debouncer<ViewKind>,
    instant_frames: BTreeMap<ViewKind, u32>,
}

impl ScrollController {
    pub fn new(config: ScrollConfig, registry: Rc<BlockRegistry>, clock: Rc<dyn Clock>) -> Self {
        let debounce = Duration::from_millis(config.debounce_ms);
        Self {
            enabled: config.scroll_sync_enabled,
            config,
            clock,
            registry,
            matches: HashMap::new(),
            viewports: BTreeMap::new(),
            last_source: None,
            settle: Deadline::new(),
            pending_scroll: Debouncer::new(debounce),
            instant_frames: BTreeMap::new(),
        }
    }

    pub fn attach(&mut self, view: ViewKind, viewport: Box<dyn ScrollViewport>) {
        self.viewports.insert(view, viewport);
    }

    pub fn detach(&mut self, view: ViewKind) -> Option<Box<dyn ScrollViewport>> {
        self.instant_frames.remove(&view);
        self.viewports.remove(&view)
    }

    pub fn viewport(&self, view: ViewKind) -> Option<&dyn ScrollViewport> {
        self.viewports.get(&view).map(|v| v.as_ref())
    }

    pub fn last_source(&self) -> Option<SyncSource> {
        self.last_source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.pending_scroll.cancel();
        }
    }

    pub fn set_matches(&mut self, results: &[MatchResult]) {
        self.matches = index_matches(results);
    }

    /// Drop everything tied to the previous document: timers, the sync
    /// token, instant markers and match anchors.
    pub fn reset(&mut self, registry: Rc<BlockRegistry>) {
        self.registry = registry;
        self.matches.clear();
        self.last_source = None;
        self.settle.cancel();
        self.pending_scroll.cancel();
        for (view, _) in std::mem::take(&mut self.instant_frames) {
            if let Some(viewport) = self.viewports.get_mut(&view) {
                viewport.set_instant(false);
            }
        }
    }

    /// Store observer entry point.
    pub fn on_sync_change(&mut self, change: &SyncChange, state: &SyncState) {
        match *change {
            SyncChange::Selected {
                block_index,
                page_number,
                origin,
            } => {
                if state.scroll_sync_enabled {
                    self.sync_to_block(origin, block_index, page_number);
                }
            }
            SyncChange::ScrollSyncToggled { enabled } => self.set_enabled(enabled),
            _ => {}
        }
    }

    /// Bring `index` into view everywhere except `origin`.
    pub fn sync_to_block(&mut self, origin: Option<ViewKind>, index: BlockIndex, page_number: usize) {
        if !self.enabled {
            return;
        }
        let Some(block) = self.registry.find_by_index(index).cloned() else {
            return;
        };

        let source = origin.map_or(SyncSource::Host, SyncSource::View);
        self.last_source = Some(source);
        self.settle
            .arm(self.clock.now(), Duration::from_millis(self.config.settle_ms));
        self.pending_scroll.cancel();

        let targets: Vec<ViewKind> = self
            .viewports
            .keys()
            .copied()
            .filter(|&view| Some(view) != origin)
            .collect();

        for target in targets {
            match self.target_offset(target, &block, page_number) {
                Some(top) => {
                    debug!("Scrolling {:?} to {:.1} for block {}", target, top, index);
                    self.scroll_instant(target, top);
                }
                None => {
                    if let Some(from) = origin {
                        debug!("No anchor for block {} in {:?}, mirroring {:?}", index, target, from);
                        self.mirror(from, target);
                    }
                }
            }
        }
    }

    /// Scroll offset that puts the block `anchor_fraction` of the way down
    /// the viewport, clamped to the scrollable range.
    pub fn target_offset(&self, view: ViewKind, block: &Block, page_number: usize) -> Option<f64> {
        let viewport = self.viewports.get(&view)?;
        let client = viewport.client_height();
        if client <= 0.0 {
            return None;
        }

        let anchor = match view {
            ViewKind::Pdf => {
                let frame = viewport.page_frame(page_number)?;
                let display = DisplaySize::new(frame.width, frame.height);
                if display.is_empty() {
                    return None;
                }
                let norm = geometry::normalize(&block.bbox, &block.page_size);
                frame.top + geometry::to_display(&norm, &display, frame.rotation).y1
            }
            ViewKind::Markdown | ViewKind::Translation => viewport.block_anchor(block.index).or_else(|| {
                let section = self.matches.get(&block.index)?.section_index?;
                viewport.section_anchor(section)
            })?,
        };

        let top = anchor - client * self.config.anchor_fraction;
        Some(top.clamp(0.0, max_scroll(viewport.as_ref())))
    }

    /// Percentage mirroring from one container to another, closing
    /// `sensitivity` of the gap. Approximate by nature.
    pub fn mirror(&mut self, from: ViewKind, to: ViewKind) -> bool {
        let Some(source) = self.viewports.get(&from) else {
            return false;
        };
        let source_max = max_scroll(source.as_ref());
        if source_max <= 0.0 {
            return false;
        }
        let ratio = (source.scroll_top() / source_max).clamp(0.0, 1.0);

        let Some(target) = self.viewports.get(&to) else {
            return false;
        };
        let target_max = max_scroll(target.as_ref());
        if target_max <= 0.0 || target.client_height() <= 0.0 {
            return false;
        }
        let current = target.scroll_top();
        let desired = ratio * target_max;
        let next = (current + (desired - current) * self.config.sensitivity).clamp(0.0, target_max);
        if (next - current).abs() < 1.0 {
            return false;
        }

        self.scroll_instant(to, next);
        true
    }

    fn scroll_instant(&mut self, view: ViewKind, top: f64) {
        let Some(viewport) = self.viewports.get_mut(&view) else {
            return;
        };
        viewport.set_instant(true);
        viewport.set_scroll_top(top);
        self.instant_frames.insert(view, self.config.instant_frames.max(1));
    }

    /// True when a scroll event from `view` is the echo of a sync action
    /// started elsewhere.
    pub fn is_echo(&self, view: ViewKind) -> bool {
        match self.last_source {
            Some(SyncSource::Host) => true,
            Some(SyncSource::View(source)) => source != view,
            None => false,
        }
    }

    /// Host scroll listener. Echo scrolls are dropped; real ones are
    /// debounced and mirrored on a later `tick`.
    pub fn on_scroll(&mut self, view: ViewKind) {
        if !self.enabled {
            return;
        }
        if self.is_echo(view) {
            debug!("Ignoring echo scroll in {:?} (source {:?})", view, self.last_source);
            return;
        }
        self.pending_scroll.trigger(self.clock.now(), view);
    }

    /// Wheel, touch or keyboard scrolling started by the user: the view
    /// becomes a legitimate source again right away.
    pub fn on_user_scroll_intent(&mut self, view: ViewKind) {
        if self.last_source.is_some() {
            debug!("User scroll in {:?} re-arms sync", view);
        }
        self.last_source = None;
        self.settle.cancel();
    }

    /// Run expired timers: clear the settled token, then act on a debounced
    /// scroll burst.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        if self.settle.fire(now) {
            debug!("Sync source {:?} settled", self.last_source);
            self.last_source = None;
        }

        if let Some(view) = self.pending_scroll.poll(now) {
            if !self.enabled || self.is_echo(view) {
                return;
            }
            let targets: Vec<ViewKind> = self
                .viewports
                .keys()
                .copied()
                .filter(|&other| other != view)
                .collect();
            let mut mirrored = false;
            for target in targets {
                mirrored |= self.mirror(view, target);
            }
            if mirrored {
                self.last_source = Some(SyncSource::View(view));
                self.settle
                    .arm(now, Duration::from_millis(self.config.settle_ms));
            }
        }
    }

    /// Count down instant markers; each is removed after its frames elapse.
    pub fn on_animation_frame(&mut self) {
        let mut expired = Vec::new();
        for (view, remaining) in self.instant_frames.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                expired.push(*view);
            }
        }
        for view in expired {
            self.instant_frames.remove(&view);
            if let Some(viewport) = self.viewports.get_mut(&view) {
                viewport.set_instant(false);
            }
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.settle.is_armed() || self.pending_scroll.is_pending() || !self.instant_frames.is_empty()
    }
}
