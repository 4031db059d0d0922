use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Leaf elements that become one section each in rendered HTML.
const HTML_SECTION_TAGS: [&str; 11] = [
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "pre", "table", "img",
];

/// Split a Markdown document into its rendered sections: one entry per
/// paragraph, heading, list item, code block, table or raw HTML block, in
/// document order. Image references keep their alt text and target so image
/// blocks can be matched against them.
pub fn sections_from_markdown(markdown: &str) -> Vec<String> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut sections = Vec::new();
    let mut buffer = String::new();
    let mut table_depth = 0usize;

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::Table(_)) => {
                flush(&mut buffer, &mut sections);
                table_depth += 1;
            }
            Event::End(TagEnd::Table) => {
                table_depth = table_depth.saturating_sub(1);
                flush(&mut buffer, &mut sections);
            }
            Event::End(TagEnd::TableCell) => buffer.push(' '),
            // text before a nested list belongs to the parent item
            Event::Start(Tag::List(_)) => flush(&mut buffer, &mut sections),
            Event::Start(Tag::Image { dest_url, .. }) => {
                push_word(&mut buffer, &dest_url);
            }
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::HtmlBlock
                | TagEnd::Item,
            ) if table_depth == 0 => flush(&mut buffer, &mut sections),
            Event::Text(text) | Event::Code(text) => buffer.push_str(&text),
            Event::Html(html) | Event::InlineHtml(html) => buffer.push_str(&html),
            Event::SoftBreak | Event::HardBreak => buffer.push(' '),
            _ => {}
        }
    }
    flush(&mut buffer, &mut sections);

    debug!("Extracted {} sections from markdown", sections.len());
    sections
}

/// Split rendered HTML into sections. Nested leaves (a paragraph inside a
/// list item or table cell) belong to their outermost leaf.
pub fn sections_from_html(html: &str) -> SyncResult<Vec<String>> {
    let selector = Selector::parse(&HTML_SECTION_TAGS.join(", "))
        .map_err(|e| SyncError::General(anyhow::anyhow!("invalid section selector: {:?}", e)))?;

    let document = Html::parse_fragment(html);
    let mut sections = Vec::new();

    for element in document.select(&selector) {
        if has_section_ancestor(&element) {
            continue;
        }
        let text = if element.value().name() == "img" {
            let alt = element.value().attr("alt").unwrap_or_default();
            let src = element.value().attr("src").unwrap_or_default();
            format!("{} {}", alt, src)
        } else {
            element.text().collect::<Vec<_>>().join(" ")
        };
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            sections.push(text);
        }
    }

    debug!("Extracted {} sections from html", sections.len());
    Ok(sections)
}

fn has_section_ancestor(element: &ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| HTML_SECTION_TAGS.contains(&e.name()))
            .unwrap_or(false)
    })
}

fn push_word(buffer: &mut String, word: &str) {
    if !buffer.is_empty() && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    buffer.push_str(word);
    buffer.push(' ');
}

fn flush(buffer: &mut String, sections: &mut Vec<String>) {
    let text = buffer.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        sections.push(text);
    }
    buffer.clear();
}
