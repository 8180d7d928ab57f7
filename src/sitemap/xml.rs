//! Minimal sitemap/sitemap-index XML parsing: extracts `<loc>` entries and
//! tells the caller whether the document was an index (so it knows to
//! recurse) or a leaf urlset.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{CoreError, CoreResult};

pub struct ParsedSitemap {
    pub is_index: bool,
    pub locations: Vec<String>,
}

pub fn parse_sitemap_xml(body: &str) -> CoreResult<ParsedSitemap> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut locations = Vec::new();
    let mut is_index = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if name.eq_ignore_ascii_case("sitemapindex") {
                    is_index = true;
                } else if name.eq_ignore_ascii_case("loc") {
                    in_loc = true;
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()).eq_ignore_ascii_case("loc") {
                    in_loc = false;
                }
            }
            Ok(Event::Text(t)) => {
                if in_loc {
                    let text = t
                        .unescape()
                        .map_err(|e| CoreError::NormalizeError(format!("sitemap xml: {e}")))?
                        .trim()
                        .to_string();
                    if !text.is_empty() {
                        locations.push(text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CoreError::NormalizeError(format!(
                    "sitemap xml parse error: {e}"
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(ParsedSitemap {
        is_index,
        locations,
    })
}

fn local_name(qualified: &[u8]) -> String {
    let s = String::from_utf8_lossy(qualified);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlset_locations() {
        let xml = r#"<?xml version="1.0"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/a</loc></url>
  <url><loc>https://example.com/b</loc></url>
</urlset>"#;
        let parsed = parse_sitemap_xml(xml).unwrap();
        assert!(!parsed.is_index);
        assert_eq!(
            parsed.locations,
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string()
            ]
        );
    }

    #[test]
    fn detects_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-1.xml</loc></sitemap>
</sitemapindex>"#;
        let parsed = parse_sitemap_xml(xml).unwrap();
        assert!(parsed.is_index);
        assert_eq!(parsed.locations, vec!["https://example.com/sitemap-1.xml"]);
    }
}
