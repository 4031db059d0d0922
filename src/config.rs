use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::document_model::CoordOrigin;
use crate::error::{SyncError, SyncResult};

/// Tunable constants for matching, scrolling and overlay drawing.
///
/// The matcher thresholds are hand-tuned heuristics; they were never
/// validated beyond Latin and CJK documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub matcher: MatcherConfig,
    pub scroll: ScrollConfig,
    pub overlay: OverlayConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum similarity for the exact pass
    pub exact_threshold: f64,

    /// Minimum blended score for the fuzzy pass
    pub fuzzy_threshold: f64,

    /// Confidence reported for position-pass assignments
    pub position_confidence: f64,

    pub jaccard_weight: f64,
    pub edit_weight: f64,
    pub overlap_weight: f64,

    /// Edit distance table covers at most this many leading characters;
    /// differing tails past it count as fully different
    pub max_edit_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Quiet period before a burst of scroll events is acted on
    pub debounce_ms: u64,

    /// How long the last sync source suppresses echo scrolls
    pub settle_ms: u64,

    /// Fraction of the gap closed by percentage mirroring
    pub sensitivity: f64,

    /// Where in the viewport the target block lands (from the top)
    pub anchor_fraction: f64,

    /// Animation frames the instant-scroll marker stays on
    pub instant_frames: u32,

    pub scroll_sync_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Padding added to the trailing (right/bottom) edges, in display pixels
    pub hit_padding_px: f64,

    /// Leading edges get this fraction of the trailing padding
    pub leading_padding_ratio: f64,

    pub selected_stroke_width: f64,
    pub hover_stroke_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub coord_origin: CoordOrigin,
    pub default_page_size: [f64; 2],
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            exact_threshold: 0.95,
            fuzzy_threshold: 0.6,
            position_confidence: 0.5,
            jaccard_weight: 0.4,
            edit_weight: 0.3,
            overlap_weight: 0.3,
            max_edit_chars: 1000,
        }
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 75,
            settle_ms: 500,
            sensitivity: 0.7,
            anchor_fraction: 1.0 / 3.0,
            instant_frames: 2,
            scroll_sync_enabled: true,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            hit_padding_px: 4.0,
            leading_padding_ratio: 0.5,
            selected_stroke_width: 2.0,
            hover_stroke_width: 1.0,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            coord_origin: CoordOrigin::TopLeft,
            default_page_size: [595.0, 842.0],
        }
    }
}

impl SyncConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::io(path.display().to_string(), e))?;

        let config: SyncConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = env_f64("BLOCKSYNC_EXACT_THRESHOLD") {
            config.matcher.exact_threshold = value;
        }
        if let Some(value) = env_f64("BLOCKSYNC_FUZZY_THRESHOLD") {
            config.matcher.fuzzy_threshold = value;
        }
        if let Some(value) = env_f64("BLOCKSYNC_SCROLL_SENSITIVITY") {
            config.scroll.sensitivity = value;
        }
        if let Ok(enabled) = std::env::var("BLOCKSYNC_SCROLL_SYNC") {
            config.scroll.scroll_sync_enabled = enabled.to_lowercase() == "true";
        }
        if let Ok(origin) = std::env::var("BLOCKSYNC_COORD_ORIGIN") {
            config.registry.coord_origin = CoordOrigin::from(origin.as_str());
        }

        config
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SyncResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| SyncError::io(path.display().to_string(), e))
    }

    /// Reject values that would make the matcher or scroll math meaningless.
    pub fn validate(&self) -> SyncResult<()> {
        let m = &self.matcher;
        for (name, value) in [
            ("exact_threshold", m.exact_threshold),
            ("fuzzy_threshold", m.fuzzy_threshold),
            ("position_confidence", m.position_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SyncError::configuration(format!(
                    "matcher.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        let weight_sum = m.jaccard_weight + m.edit_weight + m.overlap_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(SyncError::configuration(format!(
                "matcher weights must sum to 1, got {:.3}",
                weight_sum
            )));
        }

        let s = &self.scroll;
        if !(s.sensitivity > 0.0 && s.sensitivity <= 1.0) {
            return Err(SyncError::configuration(format!(
                "scroll.sensitivity must be within (0, 1], got {}",
                s.sensitivity
            )));
        }
        if !(0.0..1.0).contains(&s.anchor_fraction) {
            return Err(SyncError::configuration("scroll.anchor_fraction must be within [0, 1)"));
        }
        if s.debounce_ms == 0 || s.settle_ms == 0 {
            return Err(SyncError::configuration("scroll durations must be positive"));
        }

        if self.overlay.hit_padding_px < 0.0 || self.overlay.leading_padding_ratio < 0.0 {
            return Err(SyncError::configuration("overlay padding must not be negative"));
        }

        let [w, h] = self.registry.default_page_size;
        if w <= 0.0 || h <= 0.0 {
            return Err(SyncError::configuration("registry.default_page_size must be positive"));
        }

        Ok(())
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.parse::<f64>().ok()
}
