use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::debug;

use crate::document_model::{BlockIndex, Selection, ViewKind};
use crate::registry::BlockRegistry;

/// Everything the views render from. Owned by [`SyncStore`]; other
/// components only ever see it by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub selection: Selection,
    pub highlight_set: BTreeSet<BlockIndex>,
    pub sync_enabled: bool,
    pub scroll_sync_enabled: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            selection: Selection::cleared(),
            highlight_set: BTreeSet::new(),
            sync_enabled: true,
            scroll_sync_enabled: true,
        }
    }
}

/// What just happened, delivered to observers together with the new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncChange {
    Selected {
        block_index: BlockIndex,
        page_number: usize,
        origin: Option<ViewKind>,
    },
    Cleared {
        origin: Option<ViewKind>,
    },
    HighlightsChanged,
    HoverChanged {
        view: ViewKind,
    },
    SyncToggled {
        enabled: bool,
    },
    ScrollSyncToggled {
        enabled: bool,
    },
    DocumentReset,
}

pub type SubscriptionId = u64;

type Observer = Box<dyn FnMut(&SyncChange, &SyncState)>;

/// Host hooks fired after a click or hover has been applied.
#[derive(Default)]
pub struct HostCallbacks {
    pub on_block_click: Option<Box<dyn FnMut(BlockIndex, usize)>>,
    pub on_block_hover: Option<Box<dyn FnMut(Option<BlockIndex>, usize)>>,
}

/// Views that report "no block" as `-1` go through this.
pub fn index_from_sentinel(index: i64) -> Option<BlockIndex> {
    if index < 0 {
        None
    } else {
        Some(index as BlockIndex)
    }
}

/// Single source of truth for selection, highlights and hover.
///
/// Two states: idle (no selection) and selected. Every mutation goes
/// through a method here and observers are notified synchronously, before
/// the method returns.
pub struct SyncStore {
    state: SyncState,
    hovered: BTreeMap<ViewKind, BlockIndex>,
    registry: Rc<BlockRegistry>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: SubscriptionId,
    callbacks: HostCallbacks,
}

impl SyncStore {
    pub fn new(registry: Rc<BlockRegistry>) -> Self {
        Self {
            state: SyncState::default(),
            hovered: BTreeMap::new(),
            registry,
            observers: Vec::new(),
            next_subscription: 0,
            callbacks: HostCallbacks::default(),
        }
    }

    pub fn with_scroll_sync(mut self, enabled: bool) -> Self {
        self.state.scroll_sync_enabled = enabled;
        self
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn selection(&self) -> Selection {
        self.state.selection
    }

    pub fn registry(&self) -> &Rc<BlockRegistry> {
        &self.registry
    }

    pub fn is_selected(&self, index: BlockIndex) -> bool {
        self.state.selection.is_active && self.state.selection.block_index == Some(index)
    }

    pub fn is_highlighted(&self, index: BlockIndex) -> bool {
        self.state.highlight_set.contains(&index)
    }

    pub fn is_hovered(&self, index: BlockIndex) -> bool {
        self.hovered.values().any(|&i| i == index)
    }

    pub fn hovered(&self, view: ViewKind) -> Option<BlockIndex> {
        self.hovered.get(&view).copied()
    }

    /// Highlight set merged with whatever any view currently hovers.
    pub fn displayed_highlights(&self) -> BTreeSet<BlockIndex> {
        let mut shown = self.state.highlight_set.clone();
        shown.extend(self.hovered.values().copied());
        shown
    }

    /// Selected, highlighted or hovered: the only blocks overlays paint.
    pub fn is_notable(&self, index: BlockIndex) -> bool {
        self.is_selected(index) || self.is_highlighted(index) || self.is_hovered(index)
    }

    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&SyncChange, &SyncState) + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    pub fn set_callbacks(&mut self, callbacks: HostCallbacks) {
        self.callbacks = callbacks;
    }

    fn notify(&mut self, change: SyncChange) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&change, &self.state);
        }
    }

    /// Select a block. The page defaults to the block's own page. No-op when
    /// sync is disabled or the block does not exist.
    pub fn select_block(&mut self, index: BlockIndex, page_number: Option<usize>) -> bool {
        self.select_from(None, index, page_number)
    }

    fn select_from(
        &mut self,
        origin: Option<ViewKind>,
        index: BlockIndex,
        page_number: Option<usize>,
    ) -> bool {
        if !self.state.sync_enabled {
            debug!("Sync disabled, ignoring selection of block {}", index);
            return false;
        }
        let Some(block_page) = self.registry.find_by_index(index).map(|b| b.page_num) else {
            return false;
        };
        let page_number = page_number.unwrap_or(block_page);

        self.state.selection = Selection::active(index, page_number);
        debug!("Selected block {} on page {} from {:?}", index, page_number, origin);
        self.notify(SyncChange::Selected {
            block_index: index,
            page_number,
            origin,
        });
        true
    }

    pub fn clear_selection(&mut self) {
        self.clear_from(None);
    }

    fn clear_from(&mut self, origin: Option<ViewKind>) {
        if self.state.selection == Selection::cleared() {
            return;
        }
        self.state.selection = Selection::cleared();
        self.notify(SyncChange::Cleared { origin });
    }

    /// Flip `sync_enabled`. The current selection stays as it is.
    pub fn toggle_sync(&mut self) -> bool {
        self.set_sync_enabled(!self.state.sync_enabled);
        self.state.sync_enabled
    }

    pub fn set_sync_enabled(&mut self, enabled: bool) {
        if self.state.sync_enabled == enabled {
            return;
        }
        self.state.sync_enabled = enabled;
        self.notify(SyncChange::SyncToggled { enabled });
    }

    pub fn toggle_scroll_sync(&mut self) -> bool {
        self.state.scroll_sync_enabled = !self.state.scroll_sync_enabled;
        let enabled = self.state.scroll_sync_enabled;
        self.notify(SyncChange::ScrollSyncToggled { enabled });
        enabled
    }

    pub fn set_highlights<I: IntoIterator<Item = BlockIndex>>(&mut self, indices: I) {
        let next: BTreeSet<BlockIndex> = indices.into_iter().collect();
        if next != self.state.highlight_set {
            self.state.highlight_set = next;
            self.notify(SyncChange::HighlightsChanged);
        }
    }

    pub fn add_highlight(&mut self, index: BlockIndex) {
        if self.state.highlight_set.insert(index) {
            self.notify(SyncChange::HighlightsChanged);
        }
    }

    pub fn remove_highlight(&mut self, index: BlockIndex) {
        if self.state.highlight_set.remove(&index) {
            self.notify(SyncChange::HighlightsChanged);
        }
    }

    pub fn clear_highlights(&mut self) {
        self.set_highlights(std::iter::empty());
    }

    /// Click from any view. `None` (a click on empty space) clears the
    /// selection.
    pub fn handle_click(&mut self, view: ViewKind, index: Option<BlockIndex>, page_number: usize) {
        if !self.state.sync_enabled {
            return;
        }
        match index {
            Some(index) => {
                if self.select_from(Some(view), index, Some(page_number)) {
                    if let Some(callback) = self.callbacks.on_block_click.as_mut() {
                        callback(index, page_number);
                    }
                }
            }
            None => self.clear_from(Some(view)),
        }
    }

    pub fn handle_click_sentinel(&mut self, view: ViewKind, index: i64, page_number: usize) {
        self.handle_click(view, index_from_sentinel(index), page_number);
    }

    /// Hover from any view. Hover never touches the selection.
    pub fn handle_hover(&mut self, view: ViewKind, index: Option<BlockIndex>, page_number: usize) {
        if !self.state.sync_enabled {
            return;
        }
        let index = index.filter(|&i| self.registry.find_by_index(i).is_some());
        let previous = match index {
            Some(i) => self.hovered.insert(view, i),
            None => self.hovered.remove(&view),
        };
        if previous == index {
            return;
        }
        self.notify(SyncChange::HoverChanged { view });
        if let Some(callback) = self.callbacks.on_block_hover.as_mut() {
            callback(index, page_number);
        }
    }

    /// Install a new document: selection, highlights and hover are dropped,
    /// the sync flags survive.
    pub fn replace_document(&mut self, registry: Rc<BlockRegistry>) {
        self.registry = registry;
        self.state.selection = Selection::cleared();
        self.state.highlight_set.clear();
        self.hovered.clear();
        self.notify(SyncChange::DocumentReset);
    }
}
