//! Keeps OCR blocks synchronized across a page render, a Markdown rendering
//! and a translation view: shared selection, content matching, scroll sync
//! and highlight overlays.

pub mod cli;
pub mod config;
pub mod document_model;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod markdown;
pub mod matcher;
pub mod overlay;
pub mod registry;
pub mod scroll;
pub mod session;
pub mod sync;
pub mod timing;

pub use config::SyncConfig;
pub use document_model::{BBox, Block, BlockIndex, BlockType, MatchResult, MatchType, PageSize, Selection, ViewKind};
pub use error::{SyncError, SyncResult};
pub use registry::BlockRegistry;
pub use session::DocumentSession;
pub use sync::{SyncChange, SyncState, SyncStore};
