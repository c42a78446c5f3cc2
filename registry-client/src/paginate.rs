//! Link-header pagination for catalog and tag list endpoints.
//!
//! The distribution API pages long lists with an RFC 5988 `Link` header:
//!
//! ```text
//! Link: </v2/_catalog?last=alpine&n=100>; rel="next"
//! ```
//!
//! The target is usually relative to the registry root.

use http::{HeaderMap, Uri};
use serde::Deserialize;

/// A page of a paginated list response.
pub(crate) trait Page {
    /// Take the items out of this page.
    fn items(self) -> Vec<String>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogPage {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

impl Page for CatalogPage {
    fn items(self) -> Vec<String> {
        self.repositories.unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagPage {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl Page for TagPage {
    fn items(self) -> Vec<String> {
        self.tags.unwrap_or_default()
    }
}

/// Find the `rel="next"` target in the response headers, resolved against `current`.
pub(crate) fn next_page(headers: &HeaderMap, current: &Uri) -> Option<Uri> {
    headers
        .get_all(http::header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(parse_next)
        .and_then(|target| resolve(current, target))
}

fn parse_next(link: &str) -> Option<&str> {
    let (target, params) = link.trim().split_once(';')?;
    let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;

    let is_next = params.split(';').any(|param| {
        param
            .trim()
            .split_once('=')
            .is_some_and(|(key, value)| {
                key.trim().eq_ignore_ascii_case("rel") && value.trim().trim_matches('"') == "next"
            })
    });

    is_next.then_some(target)
}

fn resolve(current: &Uri, target: &str) -> Option<Uri> {
    let base = url::Url::parse(&current.to_string()).ok()?;
    let joined = base.join(target).ok()?;
    joined.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(link: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::LINK, HeaderValue::from_static(link));
        headers
    }

    #[test]
    fn relative_next_link() {
        let current: Uri = "https://registry.example.com/v2/_catalog?n=2".parse().unwrap();
        let next = next_page(
            &headers(r#"</v2/_catalog?last=beta&n=2>; rel="next""#),
            &current,
        )
        .unwrap();

        assert_eq!(
            next.to_string(),
            "https://registry.example.com/v2/_catalog?last=beta&n=2"
        );
    }

    #[test]
    fn absolute_next_link() {
        let current: Uri = "http://localhost:5000/v2/app/tags/list".parse().unwrap();
        let next = next_page(
            &headers(r#"<http://localhost:5000/v2/app/tags/list?last=v2&n=2>; rel=next"#),
            &current,
        )
        .unwrap();

        assert_eq!(
            next.to_string(),
            "http://localhost:5000/v2/app/tags/list?last=v2&n=2"
        );
    }

    #[test]
    fn no_next_link() {
        let current: Uri = "http://localhost:5000/v2/_catalog".parse().unwrap();
        assert!(next_page(&HeaderMap::new(), &current).is_none());
        assert!(next_page(&headers(r#"</v2/_catalog?n=2>; rel="prev""#), &current).is_none());
    }

    #[test]
    fn null_lists_are_empty() {
        let page: CatalogPage = serde_json::from_str(r#"{"repositories": null}"#).unwrap();
        assert!(page.items().is_empty());

        let page: TagPage = serde_json::from_str(r#"{"name": "app"}"#).unwrap();
        assert!(page.items().is_empty());
    }
}
