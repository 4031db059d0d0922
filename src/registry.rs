use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::document_model::{
    BBox, Block, BlockData, BlockIndex, BlockType, CoordOrigin, PageSize, RawBlock,
};
use crate::error::SyncResult;
use crate::geometry;
use crate::logging::PerformanceTimer;

/// RGBA color used by overlay painters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_css(&self) -> String {
        format!(
            "rgba({}, {}, {}, {:.2})",
            self.r,
            self.g,
            self.b,
            self.a as f64 / 255.0
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub border: Rgba,
    pub background: Rgba,
}

const DEFAULT_SCHEME: ColorScheme = ColorScheme {
    border: Rgba::new(149, 165, 166, 255),
    background: Rgba::new(149, 165, 166, 38),
};

/// Type → overlay colors. Exhaustive over [`BlockType`].
pub fn color_scheme(block_type: BlockType) -> ColorScheme {
    match block_type {
        BlockType::Text => ColorScheme {
            border: Rgba::new(52, 152, 219, 255),
            background: Rgba::new(52, 152, 219, 38),
        },
        BlockType::Title => ColorScheme {
            border: Rgba::new(46, 204, 113, 255),
            background: Rgba::new(46, 204, 113, 38),
        },
        BlockType::Image => ColorScheme {
            border: Rgba::new(255, 200, 0, 255),
            background: Rgba::new(255, 200, 0, 38),
        },
        BlockType::Table => ColorScheme {
            border: Rgba::new(155, 89, 182, 255),
            background: Rgba::new(155, 89, 182, 38),
        },
    }
}

/// Colors for an arbitrary label. Labels that no heuristic recognizes get a
/// neutral gray instead of the text colors.
pub fn color_scheme_for_label(label: &str) -> ColorScheme {
    match classify_label(label) {
        Some(block_type) => color_scheme(block_type),
        None => DEFAULT_SCHEME,
    }
}

/// Map a raw label ("heading", "figure", "table_body", ...) onto the
/// canonical enum. Unknown labels become text.
pub fn normalize_block_type(label: &str) -> BlockType {
    classify_label(label).unwrap_or(BlockType::Text)
}

fn classify_label(label: &str) -> Option<BlockType> {
    let label = label.trim().to_lowercase();
    if label.is_empty() {
        return None;
    }
    // captions and footnotes are prose even when attached to figures/tables
    if ["caption", "footnote"].iter().any(|k| label.contains(k)) {
        return Some(BlockType::Text);
    }
    if label.contains("table") {
        return Some(BlockType::Table);
    }
    if ["image", "figure", "picture", "img", "chart", "photo"]
        .iter()
        .any(|k| label.contains(k))
    {
        return Some(BlockType::Image);
    }
    if ["title", "heading", "header", "headline"].iter().any(|k| label.contains(k)) {
        return Some(BlockType::Title);
    }
    if ["text", "paragraph", "list", "equation", "formula", "abandon", "plain"]
        .iter()
        .any(|k| label.contains(k))
    {
        return Some(BlockType::Text);
    }
    None
}

/// Immutable, indexed block list for one document.
///
/// Built once per document load. Lookups by index, page and type are served
/// from maps computed at construction.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    blocks: Vec<Block>,
    by_index: HashMap<BlockIndex, usize>,
    by_page: BTreeMap<usize, Vec<usize>>,
    by_type: HashMap<BlockType, Vec<usize>>,
    page_sizes: BTreeMap<usize, PageSize>,
    declared_pages: Option<usize>,
}

impl BlockRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, config: &RegistryConfig) -> SyncResult<Self> {
        let data = BlockData::load_from_file(path)?;
        Ok(Self::from_block_data(data, config))
    }

    pub fn from_block_data(data: BlockData, config: &RegistryConfig) -> Self {
        let declared_pages = data.total_pages();
        let mut registry = Self::from_raw(data.into_raw_blocks(), config);
        registry.declared_pages = declared_pages;
        registry
    }

    /// Normalize raw records into canonical blocks. Malformed fields fall
    /// back to safe defaults so one bad record never drops the document.
    pub fn from_raw(raw: Vec<RawBlock>, config: &RegistryConfig) -> Self {
        let _timer = PerformanceTimer::start("block registry construction");
        let [default_w, default_h] = config.default_page_size;
        let default_page = PageSize::new(default_w, default_h);

        let mut taken: HashSet<BlockIndex> = raw
            .iter()
            .filter_map(|r| r.index)
            .filter(|&i| i >= 0)
            .map(|i| i as BlockIndex)
            .collect();
        let mut next_free = taken.iter().max().map_or(0, |max| max + 1);

        let mut seen: HashSet<BlockIndex> = HashSet::new();
        let mut blocks = Vec::with_capacity(raw.len());

        for (position, record) in raw.into_iter().enumerate() {
            let index = match record.index {
                Some(i) if i >= 0 => i as BlockIndex,
                other => {
                    while taken.contains(&next_free) {
                        next_free += 1;
                    }
                    warn!(
                        "Block at position {} has index {:?}, assigning {}",
                        position, other, next_free
                    );
                    taken.insert(next_free);
                    next_free
                }
            };
            if !seen.insert(index) {
                warn!("Dropping duplicate block index {}", index);
                continue;
            }

            let page_num = match record.page_num {
                Some(p) if p >= 1 => p as usize,
                other => {
                    warn!("Block {} has page {:?}, using page 1", index, other);
                    1
                }
            };

            let page_size = match record.page_size_values() {
                Some([w, h]) if PageSize::new(w, h).is_degenerate() => {
                    warn!("Block {} has unusable page size {}x{}, using default", index, w, h);
                    default_page
                }
                Some([w, h]) => PageSize::new(w, h),
                None => {
                    warn!("Block {} has no page size, using default", index);
                    default_page
                }
            };

            let bbox = match record.bbox_values() {
                Some([x1, y1, x2, y2]) => {
                    let bbox = BBox::new(x1, y1, x2, y2);
                    if bbox.is_finite() {
                        bbox
                    } else {
                        warn!("Block {} has non-finite bbox, using zero box", index);
                        BBox::default()
                    }
                }
                None => {
                    warn!("Block {} has no usable bbox, using zero box", index);
                    BBox::default()
                }
            };
            let bbox = match config.coord_origin {
                CoordOrigin::TopLeft => bbox,
                CoordOrigin::BottomLeft => geometry::flip_y(&bbox, page_size.height),
            };

            let block_type = normalize_block_type(record.block_type.as_deref().unwrap_or("text"));

            blocks.push(Block {
                index,
                block_type,
                bbox,
                page_num,
                page_size,
                content: record.content.unwrap_or_default(),
            });
        }

        Self::from_blocks(blocks)
    }

    /// Index already-canonical blocks. Later duplicates of an index are
    /// dropped; order becomes ascending index (reading order).
    pub fn from_blocks(mut blocks: Vec<Block>) -> Self {
        let mut seen = HashSet::new();
        blocks.retain(|b| seen.insert(b.index));
        blocks.sort_by_key(|b| b.index);

        let mut registry = Self {
            blocks,
            ..Default::default()
        };
        for (pos, block) in registry.blocks.iter().enumerate() {
            registry.by_index.insert(block.index, pos);
            registry.by_page.entry(block.page_num).or_default().push(pos);
            registry.by_type.entry(block.block_type).or_default().push(pos);
            registry.page_sizes.entry(block.page_num).or_insert(block.page_size);
        }

        info!(
            "Registered {} blocks across {} pages",
            registry.blocks.len(),
            registry.by_page.len()
        );
        registry
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn find_by_index(&self, index: BlockIndex) -> Option<&Block> {
        let found = self.by_index.get(&index).map(|&pos| &self.blocks[pos]);
        if found.is_none() {
            debug!("Block {} not found", index);
        }
        found
    }

    pub fn by_page(&self, page_num: usize) -> Vec<&Block> {
        self.by_page
            .get(&page_num)
            .map(|positions| positions.iter().map(|&p| &self.blocks[p]).collect())
            .unwrap_or_default()
    }

    pub fn by_type(&self, block_type: BlockType) -> Vec<&Block> {
        self.by_type
            .get(&block_type)
            .map(|positions| positions.iter().map(|&p| &self.blocks[p]).collect())
            .unwrap_or_default()
    }

    /// Pages that carry at least one block, ascending.
    pub fn pages(&self) -> Vec<usize> {
        self.by_page.keys().copied().collect()
    }

    pub fn page_size(&self, page_num: usize) -> Option<PageSize> {
        self.page_sizes.get(&page_num).copied()
    }

    /// Declared page count if the payload carried one, otherwise the highest
    /// page any block sits on.
    pub fn total_pages(&self) -> usize {
        let seen = self.by_page.keys().next_back().copied().unwrap_or(0);
        self.declared_pages.map_or(seen, |declared| declared.max(seen))
    }

    pub fn color_scheme_of(&self, index: BlockIndex) -> ColorScheme {
        self.find_by_index(index)
            .map(|b| color_scheme(b.block_type))
            .unwrap_or(DEFAULT_SCHEME)
    }
}
