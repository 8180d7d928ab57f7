//! HTML → `(title, markdown)` content normalization.
//!
//! Selector caching and the boilerplate-removal strategy follow the
//! `extract_main_content`/`SELECTOR_CACHE` shape used elsewhere in the
//! corpus for HTML-to-text extraction; this module additionally renders a
//! Markdown tree instead of plain text, per the spec's Content Normalizer
//! contract.

use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};

use crate::error::{CoreError, CoreResult};

fn unwanted_selector() -> &'static Selector {
    static CELL: OnceLock<Selector> = OnceLock::new();
    CELL.get_or_init(|| {
        Selector::parse(
            "script, style, noscript, nav, footer, \
             [role='navigation'], [role='banner'], [role='contentinfo'], \
             .advertisement, .ads, .sidebar, .menu, .comments, .social-share",
        )
        .expect("static selector must parse")
    })
}

fn content_root_candidates() -> &'static [Selector] {
    static CELL: OnceLock<Vec<Selector>> = OnceLock::new();
    CELL.get_or_init(|| {
        ["main", "article", "#content", ".content", "body"]
            .iter()
            .map(|s| Selector::parse(s).expect("static selector must parse"))
            .collect()
    })
}

fn og_title_selector() -> &'static Selector {
    static CELL: OnceLock<Selector> = OnceLock::new();
    CELL.get_or_init(|| Selector::parse("meta[property='og:title']").unwrap())
}

fn title_selector() -> &'static Selector {
    static CELL: OnceLock<Selector> = OnceLock::new();
    CELL.get_or_init(|| Selector::parse("title").unwrap())
}

fn h1_selector() -> &'static Selector {
    static CELL: OnceLock<Selector> = OnceLock::new();
    CELL.get_or_init(|| Selector::parse("h1").unwrap())
}

pub struct Normalized {
    pub title: String,
    pub markdown: String,
}

/// Converts raw HTML into `(title, markdown)`. Fails only when the document
/// cannot be parsed at all (practically never, since `scraper`'s parser is
/// lenient); otherwise returns best-effort output.
pub fn normalize(html: &str) -> CoreResult<Normalized> {
    if html.trim().is_empty() {
        return Err(CoreError::NormalizeError("empty document".to_string()));
    }

    let document = Html::parse_document(html);
    let title = extract_title(&document);
    let root = select_content_root(&document);

    let mut out = String::new();
    if let Some(root) = root {
        render_children(root, &mut out);
    }

    Ok(Normalized {
        title,
        markdown: collapse_blank_lines(&out),
    })
}

fn extract_title(document: &Html) -> String {
    if let Some(el) = document.select(og_title_selector()).next() {
        if let Some(content) = el.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return content.to_string();
            }
        }
    }
    if let Some(el) = document.select(title_selector()).next() {
        let text = element_text(el);
        if !text.is_empty() {
            return text;
        }
    }
    if let Some(el) = document.select(h1_selector()).next() {
        let text = element_text(el);
        if !text.is_empty() {
            return text;
        }
    }
    String::new()
}

fn select_content_root(document: &Html) -> Option<ElementRef<'_>> {
    content_root_candidates()
        .iter()
        .filter_map(|selector| document.select(selector).next())
        .max_by_key(|el| element_text(*el).len())
        .or_else(|| document.root_element().into())
}

fn is_unwanted(el: &ElementRef) -> bool {
    unwanted_selector().matches(el)
}

fn element_text(el: ElementRef) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_children(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            render_element(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

fn render_element(el: ElementRef, out: &mut String) {
    if is_unwanted(&el) {
        return;
    }

    let tag = el.value().name();
    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag.as_bytes()[1] - b'0';
            out.push_str(&"#".repeat(level as usize));
            out.push(' ');
            out.push_str(&element_text(el));
            out.push_str("\n\n");
        }
        "p" => {
            let mut inline = String::new();
            render_inline(el, &mut inline);
            let trimmed = inline.trim();
            if !trimmed.is_empty() {
                out.push_str(trimmed);
                out.push_str("\n\n");
            }
        }
        "ul" | "ol" => {
            render_list(el, out, tag == "ol");
            out.push('\n');
        }
        "pre" => {
            let code = el.text().collect::<Vec<_>>().join("");
            out.push_str("```\n");
            out.push_str(code.trim_end());
            out.push_str("\n```\n\n");
        }
        "table" => {
            render_table(el, out);
            out.push('\n');
        }
        "br" => out.push('\n'),
        "a" | "strong" | "b" | "em" | "i" | "code" | "span" => {
            render_inline(el, out);
        }
        "img" => render_image(el, out),
        _ => render_children(el, out),
    }
}

fn render_inline(el: ElementRef, out: &mut String) {
    let tag = el.value().name();
    match tag {
        "a" => {
            let href = el.value().attr("href").unwrap_or_default();
            let text = element_text(el);
            if href.is_empty() {
                out.push_str(&text);
            } else {
                out.push('[');
                out.push_str(&text);
                out.push_str("](");
                out.push_str(href);
                out.push(')');
            }
        }
        "strong" | "b" => {
            out.push_str("**");
            for child in el.children() {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_inline(child_el, out);
                } else if let Some(text) = child.value().as_text() {
                    out.push_str(text);
                }
            }
            out.push_str("**");
        }
        "em" | "i" => {
            out.push('_');
            for child in el.children() {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_inline(child_el, out);
                } else if let Some(text) = child.value().as_text() {
                    out.push_str(text);
                }
            }
            out.push('_');
        }
        "code" => {
            out.push('`');
            out.push_str(&element_text(el));
            out.push('`');
        }
        "img" => render_image(el, out),
        "br" => out.push('\n'),
        _ => {
            for child in el.children() {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_inline(child_el, out);
                } else if let Some(text) = child.value().as_text() {
                    out.push_str(text);
                }
            }
        }
    }
}

fn render_image(el: ElementRef, out: &mut String) {
    let alt = el.value().attr("alt").unwrap_or_default();
    let src = el.value().attr("src").unwrap_or_default();
    out.push_str("![");
    out.push_str(alt);
    out.push_str("](");
    out.push_str(src);
    out.push(')');
}

fn render_list(el: ElementRef, out: &mut String, ordered: bool) {
    let items_selector = Selector::parse("li").unwrap();
    for (i, item) in el.select(&items_selector).enumerate() {
        // Only direct-ish children: nested lists are rare in scraped marketing
        // pages and acceptable to flatten here.
        let mut text = String::new();
        render_inline(item, &mut text);
        let marker = if ordered {
            format!("{}. ", i + 1)
        } else {
            "- ".to_string()
        };
        out.push_str(&marker);
        out.push_str(text.trim());
        out.push('\n');
    }
}

fn render_table(el: ElementRef, out: &mut String) {
    let row_selector = Selector::parse("tr").unwrap();
    let cell_selector = Selector::parse("th, td").unwrap();

    let mut rows: Vec<Vec<String>> = Vec::new();
    for row in el.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|c| element_text(c).replace('|', "\\|"))
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    if rows.is_empty() {
        return;
    }

    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    for (i, row) in rows.iter().enumerate() {
        out.push('|');
        for c in 0..col_count {
            out.push(' ');
            out.push_str(row.get(c).map(String::as_str).unwrap_or(""));
            out.push_str(" |");
        }
        out.push('\n');
        if i == 0 {
            out.push('|');
            for _ in 0..col_count {
                out.push_str(" --- |");
            }
            out.push('\n');
        }
    }
}

fn collapse_blank_lines(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut blank_run = 0;
    for line in input.lines() {
        let trimmed_line = line.trim_end();
        if trimmed_line.is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                result.push('\n');
            }
        } else {
            blank_run = 0;
            result.push_str(trimmed_line);
            result.push('\n');
        }
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_heading() {
        let html = "<html><head><title>Page</title></head><body><h1>About Us</h1><p>We sell widgets.</p></body></html>";
        let result = normalize(html).unwrap();
        assert_eq!(result.title, "Page");
        assert!(result.markdown.contains("# About Us"));
        assert!(result.markdown.contains("We sell widgets."));
    }

    #[test]
    fn prefers_og_title() {
        let html = r#"<html><head><meta property="og:title" content="OG Title"/><title>Fallback</title></head><body><p>hi</p></body></html>"#;
        let result = normalize(html).unwrap();
        assert_eq!(result.title, "OG Title");
    }

    #[test]
    fn drops_script_and_nav() {
        let html = "<html><body><nav>Home</nav><script>alert(1)</script><main><p>Real content</p></main></body></html>";
        let result = normalize(html).unwrap();
        assert!(!result.markdown.contains("alert"));
        assert!(!result.markdown.contains("Home"));
        assert!(result.markdown.contains("Real content"));
    }

    #[test]
    fn collapses_excess_blank_lines() {
        let collapsed = collapse_blank_lines("a\n\n\n\n\nb");
        assert_eq!(collapsed, "a\n\n\nb".trim());
    }

    #[test]
    fn rejects_empty_document() {
        assert!(normalize("").is_err());
    }

    #[test]
    fn links_become_markdown_links() {
        let html = r#"<html><body><main><p>See <a href="/pricing">pricing</a>.</p></main></body></html>"#;
        let result = normalize(html).unwrap();
        assert!(result.markdown.contains("[pricing](/pricing)"));
    }
}
