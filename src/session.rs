use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::document_model::{BlockData, BlockIndex, MatchResult, ViewKind};
use crate::error::SyncResult;
use crate::geometry::{DisplaySize, Point, Rotation};
use crate::logging::PerformanceTimer;
use crate::markdown::{sections_from_html, sections_from_markdown};
use crate::matcher::{ContentMatcher, InputFingerprint, MatchReport};
use crate::overlay::{OverlayRenderer, Painter};
use crate::registry::BlockRegistry;
use crate::scroll::{ScrollController, ScrollViewport};
use crate::sync::{HostCallbacks, SyncState, SyncStore};
use crate::timing::{Clock, FrameHandle, FrameScheduler};

type OverlayMap = BTreeMap<(ViewKind, usize), OverlayRenderer>;

/// Invalidate every overlay. `false` when either side is borrowed by the
/// caller; the session flushes once the borrow is released.
fn invalidate_all(overlays: &RefCell<OverlayMap>, scheduler: &RefCell<Box<dyn FrameScheduler>>) -> bool {
    let (Ok(mut overlays), Ok(mut scheduler)) = (overlays.try_borrow_mut(), scheduler.try_borrow_mut()) else {
        return false;
    };
    for overlay in overlays.values_mut() {
        overlay.invalidate(scheduler.as_mut());
    }
    true
}

/// One open document and every view attached to it.
///
/// Owns the store, the scroll controller and the per-page overlays and
/// wires them together: every store change reaches the scroll controller
/// synchronously and queues a repaint of every overlay, whether it came
/// through the session or through the shared store handle.
pub struct DocumentSession {
    id: Uuid,
    generation: u64,
    config: SyncConfig,
    store: Rc<RefCell<SyncStore>>,
    scroll: Rc<RefCell<ScrollController>>,
    overlays: Rc<RefCell<OverlayMap>>,
    scheduler: Rc<RefCell<Box<dyn FrameScheduler>>>,
    repaint: Rc<Cell<bool>>,
    matcher: ContentMatcher,
    sections: Vec<String>,
    matches: Vec<MatchResult>,
    fingerprint: Option<InputFingerprint>,
}

impl DocumentSession {
    pub fn new(
        config: SyncConfig,
        clock: Rc<dyn Clock>,
        scheduler: Box<dyn FrameScheduler>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let matcher = ContentMatcher::new(config.matcher.clone())?;

        let registry = Rc::new(BlockRegistry::empty());
        let store = Rc::new(RefCell::new(
            SyncStore::new(Rc::clone(&registry)).with_scroll_sync(config.scroll.scroll_sync_enabled),
        ));
        let scroll = Rc::new(RefCell::new(ScrollController::new(
            config.scroll.clone(),
            registry,
            clock,
        )));
        let repaint = Rc::new(Cell::new(false));
        let overlays = Rc::new(RefCell::new(OverlayMap::new()));
        let scheduler = Rc::new(RefCell::new(scheduler));

        {
            let scroll = Rc::clone(&scroll);
            let repaint = Rc::clone(&repaint);
            let overlays = Rc::clone(&overlays);
            let scheduler = Rc::clone(&scheduler);
            store.borrow_mut().subscribe(move |change, state| {
                match scroll.try_borrow_mut() {
                    Ok(mut scroll) => scroll.on_sync_change(change, state),
                    Err(_) => warn!("Scroll controller busy, dropped {:?}", change),
                }
                if !invalidate_all(&overlays, &scheduler) {
                    repaint.set(true);
                }
            });
        }

        let id = Uuid::new_v4();
        info!("Started sync session {}", id);
        Ok(Self {
            id,
            generation: 0,
            config,
            store,
            scroll,
            overlays,
            scheduler,
            repaint,
            matcher,
            sections: Vec::new(),
            matches: Vec::new(),
            fingerprint: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bumped on every document load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.store.borrow().state().clone()
    }

    /// Shared store handle for views. Mutations through it repaint the
    /// overlays the same way the session's own methods do.
    pub fn store(&self) -> Rc<RefCell<SyncStore>> {
        Rc::clone(&self.store)
    }

    pub fn scroll(&self) -> Rc<RefCell<ScrollController>> {
        Rc::clone(&self.scroll)
    }

    pub fn registry(&self) -> Rc<BlockRegistry> {
        Rc::clone(self.store.borrow().registry())
    }

    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    pub fn matches(&self) -> &[MatchResult] {
        &self.matches
    }

    pub fn match_for(&self, index: BlockIndex) -> Option<&MatchResult> {
        self.matches.iter().find(|m| m.block_index == index)
    }

    pub fn set_callbacks(&mut self, callbacks: HostCallbacks) {
        self.store.borrow_mut().set_callbacks(callbacks);
    }

    /// Replace the open document.
    ///
    /// Pending frames and scroll timers of the previous document are
    /// cancelled before the new blocks are installed.
    pub fn load_document(&mut self, registry: BlockRegistry, sections: Vec<String>) -> MatchReport {
        let timer = PerformanceTimer::start("load_document");
        {
            let mut scheduler = self.scheduler.borrow_mut();
            for overlay in self.overlays.borrow_mut().values_mut() {
                overlay.cancel(scheduler.as_mut());
            }
        }
        let registry = Rc::new(registry);
        self.scroll.borrow_mut().reset(Rc::clone(&registry));
        self.matches.clear();
        self.fingerprint = None;
        self.generation += 1;

        self.store.borrow_mut().replace_document(Rc::clone(&registry));
        timer.checkpoint("installed blocks");

        let report = self.rematch(sections);
        self.flush_invalidations();
        info!(
            "Loaded document generation {} with {} blocks on {} pages",
            self.generation,
            registry.len(),
            registry.total_pages()
        );
        report
    }

    pub fn load_block_data(&mut self, data: BlockData, sections: Vec<String>) -> MatchReport {
        let registry = BlockRegistry::from_block_data(data, &self.config.registry);
        self.load_document(registry, sections)
    }

    /// New rendered sections for the current document. Returns `None` when
    /// nothing that affects matching changed.
    pub fn set_sections(&mut self, sections: Vec<String>) -> Option<MatchReport> {
        let registry = self.registry();
        let fingerprint = InputFingerprint::of(registry.blocks(), &sections);
        if self.fingerprint == Some(fingerprint) {
            debug!("Sections unchanged, keeping {} matches", self.matches.len());
            return None;
        }
        Some(self.rematch(sections))
    }

    pub fn set_markdown(&mut self, markdown: &str) -> Option<MatchReport> {
        self.set_sections(sections_from_markdown(markdown))
    }

    pub fn set_html(&mut self, html: &str) -> SyncResult<Option<MatchReport>> {
        Ok(self.set_sections(sections_from_html(html)?))
    }

    fn rematch(&mut self, sections: Vec<String>) -> MatchReport {
        let registry = self.registry();
        let results = self.matcher.match_blocks(registry.blocks(), &sections);
        let report = MatchReport::from_results(registry.blocks(), &results);
        debug!(
            "Matched {} blocks: {} exact, {} fuzzy, {} position",
            report.total_blocks, report.exact, report.fuzzy, report.position
        );

        self.scroll.borrow_mut().set_matches(&results);
        self.fingerprint = Some(InputFingerprint::of(registry.blocks(), &sections));
        self.sections = sections;
        self.matches = results;
        report
    }

    pub fn attach_viewport(&mut self, view: ViewKind, viewport: Box<dyn ScrollViewport>) {
        self.scroll.borrow_mut().attach(view, viewport);
    }

    pub fn detach_viewport(&mut self, view: ViewKind) {
        self.scroll.borrow_mut().detach(view);
    }

    pub fn attach_overlay(&mut self, view: ViewKind, page_num: usize, painter: Box<dyn Painter>) {
        let overlay = OverlayRenderer::new(view, page_num, self.config.overlay.clone(), painter);
        let old = self.overlays.borrow_mut().insert((view, page_num), overlay);
        if let Some(mut old) = old {
            old.cancel(self.scheduler.borrow_mut().as_mut());
        }
    }

    pub fn detach_overlay(&mut self, view: ViewKind, page_num: usize) {
        let removed = self.overlays.borrow_mut().remove(&(view, page_num));
        if let Some(mut overlay) = removed {
            overlay.cancel(self.scheduler.borrow_mut().as_mut());
        }
    }

    pub fn overlay(&self, view: ViewKind, page_num: usize) -> Option<Ref<'_, OverlayRenderer>> {
        Ref::filter_map(self.overlays.borrow(), |overlays| overlays.get(&(view, page_num))).ok()
    }

    /// Frame currently queued for one overlay.
    pub fn pending_frame(&self, view: ViewKind, page_num: usize) -> Option<FrameHandle> {
        self.overlays.borrow().get(&(view, page_num))?.pending_frame()
    }

    pub fn set_overlay_geometry(
        &mut self,
        view: ViewKind,
        page_num: usize,
        canvas: DisplaySize,
        css: DisplaySize,
        rotation: Rotation,
    ) {
        if let Some(overlay) = self.overlays.borrow_mut().get_mut(&(view, page_num)) {
            overlay.set_geometry(canvas, css, rotation, self.scheduler.borrow_mut().as_mut());
        }
    }

    fn flush_invalidations(&mut self) {
        if self.repaint.replace(false) && !invalidate_all(&self.overlays, &self.scheduler) {
            self.repaint.set(true);
        }
    }

    pub fn select_block(&mut self, index: BlockIndex, page_number: Option<usize>) -> bool {
        let selected = self.store.borrow_mut().select_block(index, page_number);
        self.flush_invalidations();
        selected
    }

    pub fn clear_selection(&mut self) {
        self.store.borrow_mut().clear_selection();
        self.flush_invalidations();
    }

    pub fn set_highlights<I: IntoIterator<Item = BlockIndex>>(&mut self, indices: I) {
        self.store.borrow_mut().set_highlights(indices);
        self.flush_invalidations();
    }

    pub fn toggle_sync(&mut self) -> bool {
        let enabled = self.store.borrow_mut().toggle_sync();
        self.flush_invalidations();
        enabled
    }

    pub fn toggle_scroll_sync(&mut self) -> bool {
        let enabled = self.store.borrow_mut().toggle_scroll_sync();
        self.flush_invalidations();
        enabled
    }

    /// Click on a block-tagged node in a text view. `None` clears.
    pub fn view_click(&mut self, view: ViewKind, index: Option<BlockIndex>, page_number: usize) {
        self.store.borrow_mut().handle_click(view, index, page_number);
        self.flush_invalidations();
    }

    pub fn view_hover(&mut self, view: ViewKind, index: Option<BlockIndex>, page_number: usize) {
        self.store.borrow_mut().handle_hover(view, index, page_number);
        self.flush_invalidations();
    }

    /// Resolve a pointer position to a block without holding any borrow
    /// past the lookup, so the store observer can reach the overlays.
    fn overlay_hit(&self, view: ViewKind, page_num: usize, client: Point, origin: Point) -> Option<Option<BlockIndex>> {
        let overlays = self.overlays.borrow();
        let overlay = overlays.get(&(view, page_num))?;
        let store = self.store.borrow();
        let hit = overlay.block_at(store.registry(), client, origin);
        Some(hit)
    }

    /// Click on a page overlay. A miss clears the selection.
    pub fn overlay_click(&mut self, view: ViewKind, page_num: usize, client: Point, origin: Point) -> Option<BlockIndex> {
        let hit = self.overlay_hit(view, page_num, client, origin)?;
        self.store.borrow_mut().handle_click(view, hit, page_num);
        self.flush_invalidations();
        hit
    }

    pub fn overlay_move(&mut self, view: ViewKind, page_num: usize, client: Point, origin: Point) -> Option<BlockIndex> {
        let hit = self.overlay_hit(view, page_num, client, origin)?;
        self.store.borrow_mut().handle_hover(view, hit, page_num);
        self.flush_invalidations();
        hit
    }

    pub fn overlay_leave(&mut self, view: ViewKind, page_num: usize) {
        if self.overlays.borrow().contains_key(&(view, page_num)) {
            self.store.borrow_mut().handle_hover(view, None, page_num);
        }
        self.flush_invalidations();
    }

    pub fn on_scroll(&mut self, view: ViewKind) {
        self.scroll.borrow_mut().on_scroll(view);
    }

    pub fn on_user_scroll_intent(&mut self, view: ViewKind) {
        self.scroll.borrow_mut().on_user_scroll_intent(view);
    }

    /// Run expired timers.
    pub fn tick(&mut self) {
        self.scroll.borrow_mut().tick();
    }

    /// Called once per host animation frame with the frame handles that
    /// fired. Returns how many blocks were painted in total.
    pub fn on_animation_frame(&mut self, fired: &[FrameHandle]) -> usize {
        self.scroll.borrow_mut().on_animation_frame();
        let store = self.store.borrow();
        let mut painted = 0;
        for overlay in self.overlays.borrow_mut().values_mut() {
            for &handle in fired {
                if let Some(count) = overlay.on_frame(handle, &store) {
                    painted += count;
                }
            }
        }
        painted
    }

    pub fn has_pending_work(&self) -> bool {
        self.scroll.borrow().has_pending_work() || self.overlays.borrow().values().any(|o| o.pending_frame().is_some())
    }
}
