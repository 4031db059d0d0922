use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::SyncConfig;
use crate::document_model::{BlockIndex, BlockType, MatchResult};
use crate::geometry::{DisplaySize, Padding, Point, Rotation};
use crate::logging::LoggingConfig;
use crate::markdown::{sections_from_html, sections_from_markdown};
use crate::matcher::{ContentMatcher, MatchReport};
use crate::overlay::block_under;
use crate::registry::{color_scheme, BlockRegistry};

#[derive(Parser, Debug)]
#[command(name = "blocksync")]
#[command(about = "Match OCR blocks to rendered sections and test overlay hits offline")]
#[command(version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Also write daily log files into this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Match blocks against the sections of a Markdown or HTML rendering
    Match {
        /// Block list JSON (bare array or preproc_blocks envelope)
        #[arg(long)]
        blocks: PathBuf,

        #[arg(long, conflicts_with = "html", required_unless_present = "html")]
        markdown: Option<PathBuf>,

        #[arg(long)]
        html: Option<PathBuf>,

        /// TOML config overriding thresholds
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print machine-readable JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Summarize a block list per page and per type
    Inspect {
        #[arg(long)]
        blocks: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Resolve a display-space point to a block
    Hit {
        #[arg(long)]
        blocks: PathBuf,

        #[arg(long)]
        page: usize,

        #[arg(long, allow_hyphen_values = true)]
        x: f64,

        #[arg(long, allow_hyphen_values = true)]
        y: f64,

        /// Display width in pixels (after rotation)
        #[arg(long)]
        width: f64,

        /// Display height in pixels (after rotation)
        #[arg(long)]
        height: f64,

        /// Clockwise rotation in degrees
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        rotation: i32,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    pub fn logging_config(&self) -> LoggingConfig {
        let mut config = LoggingConfig {
            level: self.log_level.clone(),
            ..LoggingConfig::default()
        };
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
            config.enable_file_logging = true;
        }
        config
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Match {
            blocks,
            markdown,
            html,
            config,
            json,
        } => {
            let output = match_command(&blocks, markdown.as_deref(), html.as_deref(), config.as_deref(), json)?;
            print!("{}", output);
        }
        Commands::Inspect { blocks, config } => {
            print!("{}", inspect_command(&blocks, config.as_deref())?);
        }
        Commands::Hit {
            blocks,
            page,
            x,
            y,
            width,
            height,
            rotation,
            config,
        } => {
            let hit = hit_command(&blocks, page, Point::new(x, y), DisplaySize::new(width, height), rotation, config.as_deref())?;
            match hit {
                Some(index) => println!("{}", index),
                None => println!("-1"),
            }
        }
    }
    Ok(())
}

/// File config when given, environment overrides otherwise.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None => {
            let config = SyncConfig::load_from_env();
            config.validate()?;
            Ok(config)
        }
    }
}

fn load_registry(blocks: &Path, config: &SyncConfig) -> Result<BlockRegistry> {
    BlockRegistry::load_from_file(blocks, &config.registry)
        .with_context(|| format!("Failed to load blocks from {:?}", blocks))
}

#[derive(Serialize)]
struct MatchOutput<'a> {
    report: &'a MatchReport,
    matches: &'a [MatchResult],
}

pub fn match_command(
    blocks: &Path,
    markdown: Option<&Path>,
    html: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<String> {
    let config = load_config(config)?;
    let registry = load_registry(blocks, &config)?;

    let sections = match (markdown, html) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            sections_from_markdown(&text)
        }
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            sections_from_html(&text)?
        }
        (None, None) => anyhow::bail!("either --markdown or --html is required"),
    };
    info!("Matching {} blocks against {} sections", registry.len(), sections.len());

    let matcher = ContentMatcher::new(config.matcher.clone())?;
    let results = matcher.match_blocks(registry.blocks(), &sections);
    let report = MatchReport::from_results(registry.blocks(), &results);

    if json {
        let output = MatchOutput {
            report: &report,
            matches: &results,
        };
        return Ok(format!("{}\n", serde_json::to_string_pretty(&output)?));
    }

    let mut out = String::new();
    for result in &results {
        let preview = registry
            .find_by_index(result.block_index)
            .map(|b| b.preview(48))
            .unwrap_or_default();
        let section = result
            .section_index
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        out.push_str(&format!(
            "{:>5} -> {:>5}  {:<8} {:.2}  {}\n",
            result.block_index,
            section,
            format!("{:?}", result.match_type).to_lowercase(),
            result.confidence,
            preview
        ));
    }
    out.push_str(&format!(
        "\n{} blocks ({} empty): {} exact, {} fuzzy, {} position, {} without section, mean confidence {:.2}\n",
        report.total_blocks,
        report.skipped_empty,
        report.exact,
        report.fuzzy,
        report.position,
        report.without_section,
        report.mean_confidence
    ));
    Ok(out)
}

pub fn inspect_command(blocks: &Path, config: Option<&Path>) -> Result<String> {
    let config = load_config(config)?;
    let registry = load_registry(blocks, &config)?;

    let mut out = format!(
        "{} blocks on {} pages\n",
        registry.len(),
        registry.total_pages()
    );
    for page in registry.pages() {
        let on_page = registry.by_page(page);
        let mut per_type: BTreeMap<&str, usize> = BTreeMap::new();
        for block in &on_page {
            *per_type.entry(block.block_type.as_str()).or_default() += 1;
        }
        let counts: Vec<String> = per_type
            .iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect();
        out.push_str(&format!("page {:>3}: {:>4} blocks  {}\n", page, on_page.len(), counts.join(" ")));
    }

    out.push('\n');
    for block_type in BlockType::ALL {
        let scheme = color_scheme(block_type);
        out.push_str(&format!(
            "{:<6} {:>4}  border {}  background {}\n",
            block_type.as_str(),
            registry.by_type(block_type).len(),
            scheme.border.to_css(),
            scheme.background.to_css()
        ));
    }
    Ok(out)
}

pub fn hit_command(
    blocks: &Path,
    page: usize,
    point: Point,
    display: DisplaySize,
    rotation: i32,
    config: Option<&Path>,
) -> Result<Option<BlockIndex>> {
    let config = load_config(config)?;
    let registry = load_registry(blocks, &config)?;
    let rotation = Rotation::from_degrees(rotation)
        .with_context(|| format!("Rotation must be a multiple of 90, got {}", rotation))?;
    if display.is_empty() {
        anyhow::bail!("Display size must be positive");
    }

    let padding = Padding::with_ratio(config.overlay.hit_padding_px, config.overlay.leading_padding_ratio);
    Ok(block_under(&registry, page, &display, rotation, padding, point))
}
