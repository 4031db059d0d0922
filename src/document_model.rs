use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{SyncError, SyncResult};

/// Stable block identifier, unique within one document
pub type BlockIndex = usize;

/// Canonical block classes. Everything the OCR layer emits collapses into one
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Title,
    Image,
    Table,
}

impl BlockType {
    pub const ALL: [BlockType; 4] = [
        BlockType::Text,
        BlockType::Title,
        BlockType::Image,
        BlockType::Table,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Title => "title",
            BlockType::Image => "image",
            BlockType::Table => "table",
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned box `(x1, y1, x2, y2)`.
///
/// In page space the origin is the top-left corner of the page and y grows
/// downward. Sources that use a bottom-left origin are flipped once when the
/// registry loads them (see [`CoordOrigin`]).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    /// Build a box, reordering corners so `x1 <= x2` and `y1 <= y2`.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// A page size with a zero, negative or non-finite side cannot be used to
    /// normalize coordinates.
    pub fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }
}

/// Where a block source puts its y origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

impl From<&str> for CoordOrigin {
    fn from(s: &str) -> Self {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "bottomleft" => CoordOrigin::BottomLeft,
            _ => CoordOrigin::TopLeft,
        }
    }
}

/// One structural unit of the source document. Immutable once the registry
/// has built it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: BlockIndex,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub bbox: BBox,
    pub page_num: usize,
    pub page_size: PageSize,
    pub content: String,
}

impl Block {
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Short single-line preview for logs and the CLI.
    pub fn preview(&self, width: usize) -> String {
        let flat = self.content.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut lines = textwrap::wrap(&flat, width.max(1));
        match lines.len() {
            0 => String::new(),
            1 => lines.remove(0).into_owned(),
            _ => format!("{}…", lines[0]),
        }
    }
}

/// Block record as it arrives from the OCR/API layer. Every field is
/// optional; the registry turns it into a [`Block`] with safe defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBlock {
    pub index: Option<i64>,
    #[serde(rename = "type", alias = "block_type", alias = "label")]
    pub block_type: Option<String>,
    pub bbox: Option<serde_json::Value>,
    #[serde(alias = "page", alias = "page_no")]
    pub page_num: Option<i64>,
    pub page_size: Option<serde_json::Value>,
    #[serde(alias = "text")]
    pub content: Option<String>,
}

impl RawBlock {
    /// Read `bbox` as either `[x1, y1, x2, y2]` or a Docling-style
    /// `{l, t, r, b}` object.
    pub fn bbox_values(&self) -> Option<[f64; 4]> {
        match self.bbox.as_ref()? {
            serde_json::Value::Array(items) if items.len() == 4 => {
                let mut out = [0.0; 4];
                for (slot, item) in out.iter_mut().zip(items) {
                    *slot = item.as_f64()?;
                }
                Some(out)
            }
            serde_json::Value::Object(map) => {
                let get = |key: &str| map.get(key).and_then(|v| v.as_f64());
                Some([get("l")?, get("t")?, get("r")?, get("b")?])
            }
            _ => None,
        }
    }

    /// Read `page_size` as `[width, height]` or `{width, height}`.
    pub fn page_size_values(&self) -> Option<[f64; 2]> {
        match self.page_size.as_ref()? {
            serde_json::Value::Array(items) if items.len() == 2 => {
                Some([items[0].as_f64()?, items[1].as_f64()?])
            }
            serde_json::Value::Object(map) => {
                let get = |key: &str| map.get(key).and_then(|v| v.as_f64());
                Some([get("width")?, get("height")?])
            }
            _ => None,
        }
    }
}

/// Block payload as served by the results API: either a bare array or the
/// `{ "preproc_blocks": [...] }` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockData {
    Envelope {
        preproc_blocks: Vec<RawBlock>,
        #[serde(default)]
        total_pages: Option<usize>,
    },
    List(Vec<RawBlock>),
}

impl BlockData {
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let value = serde_json::from_str(json).map_err(|e| SyncError::json("block data", e))?;
        Self::from_value(value)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::io(path.display().to_string(), e))?;
        let value = serde_json::from_str(&content)
            .map_err(|e| SyncError::json(path.display().to_string(), e))?;
        Self::from_value(value)
    }

    /// Decode record by record: a record that does not even have the shape
    /// of a block becomes an all-default one instead of failing the load.
    pub fn from_value(value: serde_json::Value) -> SyncResult<Self> {
        use serde_json::Value;

        let records = |items: Vec<Value>| -> Vec<RawBlock> {
            items
                .into_iter()
                .enumerate()
                .map(|(position, item)| {
                    serde_json::from_value(item).unwrap_or_else(|e| {
                        warn!("Block record {} is malformed ({}), using defaults", position, e);
                        RawBlock::default()
                    })
                })
                .collect()
        };

        match value {
            Value::Array(items) => Ok(BlockData::List(records(items))),
            Value::Object(mut map) => {
                let blocks = match map.remove("preproc_blocks") {
                    Some(Value::Array(items)) => records(items),
                    Some(_) => {
                        return Err(SyncError::invalid_block_data("preproc_blocks is not an array"))
                    }
                    None => {
                        return Err(SyncError::invalid_block_data(
                            "expected a block array or a preproc_blocks envelope",
                        ))
                    }
                };
                let total_pages = map
                    .get("total_pages")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize);
                Ok(BlockData::Envelope {
                    preproc_blocks: blocks,
                    total_pages,
                })
            }
            other => Err(SyncError::invalid_block_data(format!(
                "unexpected top-level JSON value: {}",
                other
            ))),
        }
    }

    pub fn total_pages(&self) -> Option<usize> {
        match self {
            BlockData::Envelope { total_pages, .. } => *total_pages,
            BlockData::List(_) => None,
        }
    }

    pub fn into_raw_blocks(self) -> Vec<RawBlock> {
        match self {
            BlockData::Envelope { preproc_blocks, .. } => preproc_blocks,
            BlockData::List(blocks) => blocks,
        }
    }
}

/// The views that can originate or receive a sync action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    /// Source page render with overlays
    Pdf,
    /// Reconstructed Markdown document
    Markdown,
    /// Translation overlay, scrolls alongside the Markdown side
    Translation,
}

impl ViewKind {
    pub const ALL: [ViewKind; 3] = [ViewKind::Pdf, ViewKind::Markdown, ViewKind::Translation];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub block_index: Option<BlockIndex>,
    pub page_number: Option<usize>,
    pub is_active: bool,
}

impl Selection {
    pub fn active(block_index: BlockIndex, page_number: usize) -> Self {
        Self {
            block_index: Some(block_index),
            page_number: Some(page_number),
            is_active: true,
        }
    }

    pub fn cleared() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Position,
}

/// One block → section association.
///
/// `section_index` is `None` only for position-pass results produced after
/// every section was already claimed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub block_index: BlockIndex,
    pub section_index: Option<usize>,
    pub confidence: f64,
    pub match_type: MatchType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_reorders_corners() {
        let bbox = BBox::new(100.0, 20.0, 0.0, 0.0);
        assert_eq!(bbox.to_array(), [0.0, 0.0, 100.0, 20.0]);
        assert_eq!(bbox.width(), 100.0);
        assert_eq!(bbox.height(), 20.0);
    }

    #[test]
    fn test_page_size_degenerate() {
        assert!(PageSize::new(0.0, 800.0).is_degenerate());
        assert!(PageSize::new(f64::NAN, 800.0).is_degenerate());
        assert!(!PageSize::new(200.0, 800.0).is_degenerate());
    }

    #[test]
    fn test_coord_origin_parsing() {
        assert_eq!(CoordOrigin::from("BOTTOMLEFT"), CoordOrigin::BottomLeft);
        assert_eq!(CoordOrigin::from("bottom_left"), CoordOrigin::BottomLeft);
        assert_eq!(CoordOrigin::from("TOPLEFT"), CoordOrigin::TopLeft);
        assert_eq!(CoordOrigin::from("whatever"), CoordOrigin::TopLeft);
    }

    #[test]
    fn test_raw_block_bbox_shapes() {
        let raw: RawBlock = serde_json::from_str(
            r#"{"index": 1, "type": "text", "bbox": [0, 0, 100, 20], "page_num": 1, "page_size": [200, 800], "content": "x"}"#,
        )
        .unwrap();
        assert_eq!(raw.bbox_values(), Some([0.0, 0.0, 100.0, 20.0]));
        assert_eq!(raw.page_size_values(), Some([200.0, 800.0]));

        let docling: RawBlock = serde_json::from_str(
            r#"{"bbox": {"l": 1, "t": 2, "r": 3, "b": 4}, "page_size": {"width": 10, "height": 20}}"#,
        )
        .unwrap();
        assert_eq!(docling.bbox_values(), Some([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(docling.page_size_values(), Some([10.0, 20.0]));

        let broken: RawBlock = serde_json::from_str(r#"{"bbox": [1, 2, 3], "page_size": "A4"}"#).unwrap();
        assert_eq!(broken.bbox_values(), None);
        assert_eq!(broken.page_size_values(), None);
    }

    #[test]
    fn test_block_data_envelope_and_list() {
        let envelope = BlockData::from_json_str(
            r#"{"preproc_blocks": [{"index": 0, "content": "a"}], "total_pages": 3}"#,
        )
        .unwrap();
        assert_eq!(envelope.total_pages(), Some(3));
        assert_eq!(envelope.into_raw_blocks().len(), 1);

        let list = BlockData::from_json_str(r#"[{"index": 0}, {"index": 1}]"#).unwrap();
        assert_eq!(list.total_pages(), None);
        assert_eq!(list.into_raw_blocks().len(), 2);

        assert!(matches!(
            BlockData::from_json_str("{\"nope\": true}"),
            Err(SyncError::InvalidBlockData { .. })
        ));
        assert!(BlockData::from_json_str("42").is_err());

        let lenient = BlockData::from_json_str(r#"[{"index": "zero"}, {"index": 1}]"#).unwrap();
        let raw = lenient.into_raw_blocks();
        assert_eq!(raw[0], RawBlock::default());
        assert_eq!(raw[1].index, Some(1));
    }

    #[test]
    fn test_selection_serializes_camel_case() {
        let json = serde_json::to_value(Selection::active(2, 1)).unwrap();
        assert_eq!(json["blockIndex"], 2);
        assert_eq!(json["pageNumber"], 1);
        assert_eq!(json["isActive"], true);
    }

    #[test]
    fn test_block_preview_truncates() {
        let block = Block {
            index: 0,
            block_type: BlockType::Text,
            bbox: BBox::default(),
            page_num: 1,
            page_size: PageSize::new(1.0, 1.0),
            content: "The quick brown fox\njumps over the lazy dog".to_string(),
        };
        assert_eq!(block.preview(100), "The quick brown fox jumps over the lazy dog");
        assert_eq!(block.preview(10), "The quick…");
    }
}
