use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use blocksync::document_model::{BBox, Block, BlockType, PageSize, ViewKind};
use blocksync::geometry::{DisplaySize, Point, Rotation};
use blocksync::overlay::Painter;
use blocksync::registry::{BlockRegistry, Rgba};
use blocksync::scroll::{PageFrame, ScrollViewport};
use blocksync::sync::HostCallbacks;
use blocksync::timing::{FrameHandle, FrameScheduler, ManualClock};
use blocksync::{DocumentSession, SyncConfig};
use proptest::prelude::*;

#[derive(Debug, Default)]
struct ViewLog {
    scroll_top: f64,
    writes: Vec<f64>,
}

struct FakeViewport {
    log: Rc<RefCell<ViewLog>>,
    scroll_height: f64,
    pages: Vec<PageFrame>,
    sections: Vec<f64>,
}

impl ScrollViewport for FakeViewport {
    fn scroll_top(&self) -> f64 {
        self.log.borrow().scroll_top
    }
    fn scroll_height(&self) -> f64 {
        self.scroll_height
    }
    fn client_height(&self) -> f64 {
        600.0
    }
    fn set_scroll_top(&mut self, top: f64) {
        let mut log = self.log.borrow_mut();
        log.scroll_top = top;
        log.writes.push(top);
    }
    fn page_frame(&self, page_num: usize) -> Option<PageFrame> {
        self.pages.get(page_num.checked_sub(1)?).copied()
    }
    fn section_anchor(&self, section_index: usize) -> Option<f64> {
        self.sections.get(section_index).copied()
    }
}

#[derive(Debug, Default)]
struct FrameLog {
    next: u64,
    requested: Vec<FrameHandle>,
    cancelled: Vec<FrameHandle>,
}

struct SharedScheduler(Rc<RefCell<FrameLog>>);

impl FrameScheduler for SharedScheduler {
    fn request_frame(&mut self) -> FrameHandle {
        let mut log = self.0.borrow_mut();
        log.next += 1;
        let handle = FrameHandle(log.next);
        log.requested.push(handle);
        handle
    }
    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.0.borrow_mut().cancelled.push(handle);
    }
}

struct CountingPainter(Rc<RefCell<usize>>);

impl Painter for CountingPainter {
    fn resize(&mut self, _size: DisplaySize) {}
    fn clear(&mut self) {}
    fn fill_rect(&mut self, _rect: &BBox, _color: Rgba) {
        *self.0.borrow_mut() += 1;
    }
    fn stroke_rect(&mut self, _rect: &BBox, _color: Rgba, _width: f64) {}
}

const CONTENTS: [&str; 4] = [
    "Quarterly results overview",
    "Revenue increased by twelve percent across all regions",
    "Operating costs remained flat compared with last year",
    "Outlook for the next quarter is cautiously optimistic",
];

fn registry() -> BlockRegistry {
    let layout = [(1, 0.0, 40.0), (1, 400.0, 480.0), (2, 100.0, 160.0), (2, 500.0, 560.0)];
    let blocks = layout
        .iter()
        .enumerate()
        .map(|(index, &(page, y1, y2))| Block {
            index,
            block_type: if index == 0 { BlockType::Title } else { BlockType::Text },
            bbox: BBox::new(10.0, y1, 190.0, y2),
            page_num: page,
            page_size: PageSize::new(200.0, 800.0),
            content: CONTENTS[index].to_string(),
        })
        .collect();
    BlockRegistry::from_blocks(blocks)
}

struct Harness {
    clock: Rc<ManualClock>,
    frames: Rc<RefCell<FrameLog>>,
    fills: Rc<RefCell<usize>>,
    pdf: Rc<RefCell<ViewLog>>,
    md: Rc<RefCell<ViewLog>>,
    session: DocumentSession,
}

fn harness() -> Harness {
    let clock = Rc::new(ManualClock::new());
    let frames = Rc::new(RefCell::new(FrameLog::default()));
    let mut session = DocumentSession::new(
        SyncConfig::default(),
        clock.clone(),
        Box::new(SharedScheduler(frames.clone())),
    )
    .unwrap();

    let pdf = Rc::new(RefCell::new(ViewLog::default()));
    session.attach_viewport(
        ViewKind::Pdf,
        Box::new(FakeViewport {
            log: pdf.clone(),
            scroll_height: 2000.0,
            pages: vec![PageFrame::new(0.0, 250.0, 1000.0), PageFrame::new(1000.0, 250.0, 1000.0)],
            sections: Vec::new(),
        }),
    );
    let md = Rc::new(RefCell::new(ViewLog::default()));
    session.attach_viewport(
        ViewKind::Markdown,
        Box::new(FakeViewport {
            log: md.clone(),
            scroll_height: 3000.0,
            pages: Vec::new(),
            sections: vec![100.0, 700.0, 1300.0, 1900.0],
        }),
    );

    let fills = Rc::new(RefCell::new(0));
    for page in [1, 2] {
        session.attach_overlay(ViewKind::Pdf, page, Box::new(CountingPainter(fills.clone())));
        session.set_overlay_geometry(
            ViewKind::Pdf,
            page,
            DisplaySize::new(250.0, 1000.0),
            DisplaySize::new(250.0, 1000.0),
            Rotation::R0,
        );
    }

    let report = session.load_document(registry(), CONTENTS.iter().map(|s| s.to_string()).collect());
    assert_eq!(report.exact, 4);

    Harness {
        clock,
        frames,
        fills,
        pdf,
        md,
        session,
    }
}

fn pending_handles(h: &Harness) -> Vec<FrameHandle> {
    [1, 2]
        .iter()
        .filter_map(|&page| h.session.pending_frame(ViewKind::Pdf, page))
        .collect()
}

#[test]
fn pdf_click_scrolls_markdown_without_echo() {
    let mut h = harness();
    let hit = h
        .session
        .overlay_click(ViewKind::Pdf, 1, Point::new(100.0, 550.0), Point::new(0.0, 0.0));
    assert_eq!(hit, Some(1));
    assert_eq!(h.md.borrow().writes, vec![500.0]);
    assert!(h.pdf.borrow().writes.is_empty());

    // the programmatic markdown scroll reports back
    h.clock.advance(Duration::from_millis(16));
    h.session.on_scroll(ViewKind::Markdown);
    h.clock.advance(Duration::from_millis(100));
    h.session.tick();
    assert!(h.pdf.borrow().writes.is_empty());

    h.clock.advance(Duration::from_millis(500));
    h.session.tick();
    assert_eq!(h.session.scroll().borrow().last_source(), None);
}

#[test]
fn markdown_click_scrolls_pdf_page() {
    let mut h = harness();
    h.session.view_click(ViewKind::Markdown, Some(2), 2);
    // page 2 top 1000 + 100/800 of 1000 - 200
    assert_eq!(h.pdf.borrow().writes, vec![925.0]);
    assert!(h.md.borrow().writes.is_empty());

    h.session.view_click(ViewKind::Markdown, Some(3), 2);
    // 1625 - 200 clamps to the 1400 maximum
    assert_eq!(h.pdf.borrow().writes, vec![925.0, 1400.0]);
}

#[test]
fn click_on_empty_space_clears_selection() {
    let mut h = harness();
    h.session.select_block(0, None);
    assert!(h.session.state().selection.is_active);
    let hit = h
        .session
        .overlay_click(ViewKind::Pdf, 1, Point::new(100.0, 900.0), Point::new(0.0, 0.0));
    assert_eq!(hit, None);
    assert!(!h.session.state().selection.is_active);
}

#[test]
fn hover_bursts_coalesce_into_one_frame_per_overlay() {
    let mut h = harness();
    h.session.on_animation_frame(&pending_handles(&h));
    let before = h.frames.borrow().requested.len();

    for y in [510.0, 520.0, 530.0, 20.0, 30.0] {
        h.session
            .overlay_move(ViewKind::Pdf, 1, Point::new(100.0, y), Point::new(0.0, 0.0));
    }
    assert_eq!(h.frames.borrow().requested.len(), before + 2);
    assert_eq!(*h.fills.borrow(), 0);

    let painted = h.session.on_animation_frame(&pending_handles(&h));
    assert_eq!(painted, 1);
    assert_eq!(*h.fills.borrow(), 1);
    assert_eq!(h.session.store().borrow().hovered(ViewKind::Pdf), Some(0));
    assert!(!h.session.state().selection.is_active);
}

#[test]
fn store_handle_mutations_repaint_overlays() {
    let mut h = harness();
    h.session.on_animation_frame(&pending_handles(&h));
    assert!(pending_handles(&h).is_empty());

    let store = h.session.store();
    store.borrow_mut().select_block(0, None);
    assert_eq!(pending_handles(&h).len(), 2);
    assert_eq!(h.session.on_animation_frame(&pending_handles(&h)), 1);

    store.borrow_mut().add_highlight(1);
    assert_eq!(pending_handles(&h).len(), 2);
    assert_eq!(h.session.on_animation_frame(&pending_handles(&h)), 2);
    assert_eq!(*h.fills.borrow(), 3);
}

fn attach_translation(h: &mut Harness) -> Rc<RefCell<ViewLog>> {
    let log = Rc::new(RefCell::new(ViewLog::default()));
    h.session.attach_viewport(
        ViewKind::Translation,
        Box::new(FakeViewport {
            log: log.clone(),
            scroll_height: 4000.0,
            pages: Vec::new(),
            sections: vec![200.0, 1000.0, 1800.0, 2600.0],
        }),
    );
    log
}

#[test]
fn markdown_click_scrolls_pdf_and_translation() {
    let mut h = harness();
    let translation = attach_translation(&mut h);
    h.session.view_click(ViewKind::Markdown, Some(2), 2);
    assert_eq!(h.pdf.borrow().writes, vec![925.0]);
    assert_eq!(translation.borrow().writes, vec![1600.0]);
    assert!(h.md.borrow().writes.is_empty());

    // both programmatic scrolls report back inside the settle window
    h.session.on_scroll(ViewKind::Pdf);
    h.session.on_scroll(ViewKind::Translation);
    h.clock.advance(Duration::from_millis(100));
    h.session.tick();
    assert!(h.md.borrow().writes.is_empty());
    assert_eq!(translation.borrow().writes.len(), 1);
    assert_eq!(h.pdf.borrow().writes.len(), 1);
}

#[test]
fn translation_scroll_is_mirrored_to_both_views() {
    let mut h = harness();
    let translation = attach_translation(&mut h);
    translation.borrow_mut().scroll_top = 1700.0;
    h.session.on_user_scroll_intent(ViewKind::Translation);
    h.session.on_scroll(ViewKind::Translation);
    h.clock.advance(Duration::from_millis(80));
    h.session.tick();

    // half way through translation, 0.7 of the gap in each target
    assert_eq!(h.pdf.borrow().writes.len(), 1);
    assert!((h.pdf.borrow().writes[0] - 490.0).abs() < 1e-9);
    assert_eq!(h.md.borrow().writes.len(), 1);
    assert!((h.md.borrow().writes[0] - 840.0).abs() < 1e-9);

    h.session.on_scroll(ViewKind::Pdf);
    h.session.on_scroll(ViewKind::Markdown);
    h.clock.advance(Duration::from_millis(80));
    h.session.tick();
    assert!(translation.borrow().writes.is_empty());
}

#[test]
fn document_switch_cancels_pending_work() {
    let mut h = harness();
    h.session.on_animation_frame(&pending_handles(&h));
    h.session.select_block(1, None);
    let stale = pending_handles(&h);
    assert_eq!(stale.len(), 2);
    assert!(h.session.scroll().borrow().has_pending_work());

    h.session.load_document(registry(), Vec::new());
    for handle in &stale {
        assert!(h.frames.borrow().cancelled.contains(handle));
    }
    assert!(!h.session.scroll().borrow().has_pending_work());
    assert_eq!(h.session.generation(), 2);
    assert_eq!(h.session.on_animation_frame(&stale), 0);
    assert!(h.session.matches().iter().all(|m| m.section_index.is_none()));
}

#[test]
fn disabled_sync_keeps_selection_and_ignores_clicks() {
    let mut h = harness();
    h.session.select_block(0, None);
    assert!(!h.session.toggle_sync());
    h.session.view_click(ViewKind::Markdown, Some(2), 2);
    h.session
        .overlay_click(ViewKind::Pdf, 1, Point::new(100.0, 900.0), Point::new(0.0, 0.0));
    let state = h.session.state();
    assert_eq!(state.selection.block_index, Some(0));
    assert!(state.selection.is_active);
}

#[test]
fn host_callbacks_receive_click_and_hover() {
    let mut h = harness();
    let clicks = Rc::new(RefCell::new(Vec::new()));
    let hovers = Rc::new(RefCell::new(Vec::new()));
    let (c, v) = (clicks.clone(), hovers.clone());
    h.session.set_callbacks(HostCallbacks {
        on_block_click: Some(Box::new(move |index, page| c.borrow_mut().push((index, page)))),
        on_block_hover: Some(Box::new(move |index, page| v.borrow_mut().push((index, page)))),
    });

    h.session.view_click(ViewKind::Translation, Some(3), 2);
    h.session.view_hover(ViewKind::Markdown, Some(1), 1);
    h.session.view_hover(ViewKind::Markdown, None, 1);
    assert_eq!(*clicks.borrow(), vec![(3, 2)]);
    assert_eq!(*hovers.borrow(), vec![(Some(1), 1), (None, 1)]);
}

#[test]
fn user_scroll_is_mirrored_after_debounce() {
    let mut h = harness();
    h.md.borrow_mut().scroll_top = 1200.0;
    h.session.on_user_scroll_intent(ViewKind::Markdown);
    h.session.on_scroll(ViewKind::Markdown);
    h.clock.advance(Duration::from_millis(80));
    h.session.tick();

    // half way through markdown, 0.7 of the gap to half way through pdf
    let writes = h.pdf.borrow().writes.clone();
    assert_eq!(writes.len(), 1);
    assert!((writes[0] - 490.0).abs() < 1e-9);

    h.session.on_scroll(ViewKind::Pdf);
    h.clock.advance(Duration::from_millis(80));
    h.session.tick();
    assert!(h.md.borrow().writes.is_empty());
}

#[test]
fn scroll_sync_toggle_stops_scrolling() {
    let mut h = harness();
    assert!(!h.session.toggle_scroll_sync());
    h.session.view_click(ViewKind::Markdown, Some(2), 2);
    assert!(h.pdf.borrow().writes.is_empty());
    assert!(h.session.state().selection.is_active);
}

proptest! {
    #[test]
    fn origin_view_is_never_scrolled_by_its_own_selection(
        actions in prop::collection::vec((any::<bool>(), 0usize..4, 0u64..700), 1..12)
    ) {
        let mut h = harness();
        for (from_pdf, index, wait_ms) in actions {
            let (origin, target, origin_log) = if from_pdf {
                (ViewKind::Pdf, ViewKind::Markdown, h.pdf.clone())
            } else {
                (ViewKind::Markdown, ViewKind::Pdf, h.md.clone())
            };
            let page = if index < 2 { 1 } else { 2 };
            let before = origin_log.borrow().writes.len();

            h.session.view_click(origin, Some(index), page);
            h.clock.advance(Duration::from_millis(wait_ms.min(400)));
            h.session.on_scroll(target);
            h.clock.advance(Duration::from_millis(90));
            h.session.tick();

            prop_assert_eq!(origin_log.borrow().writes.len(), before);
            h.clock.advance(Duration::from_millis(wait_ms));
            h.session.tick();
        }
    }
}
