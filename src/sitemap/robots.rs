//! Extracts `Sitemap:` directives from a `robots.txt` body.

pub fn extract_sitemap_directives(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("sitemap") {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
        .filter(|url| !url.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_directive() {
        let body = "User-agent: *\nDisallow: /admin\nSitemap: https://example.com/sitemap.xml\n";
        assert_eq!(
            extract_sitemap_directives(body),
            vec!["https://example.com/sitemap.xml"]
        );
    }

    #[test]
    fn extracts_multiple_directives_case_insensitively() {
        let body = "SITEMAP: https://example.com/a.xml\nsitemap:https://example.com/b.xml\n";
        assert_eq!(
            extract_sitemap_directives(body),
            vec![
                "https://example.com/a.xml".to_string(),
                "https://example.com/b.xml".to_string()
            ]
        );
    }

    #[test]
    fn no_directives_returns_empty() {
        let body = "User-agent: *\nDisallow: /\n";
        assert!(extract_sitemap_directives(body).is_empty());
    }
}
