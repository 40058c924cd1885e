//! Link extraction from "Index of" directory listings.
//!
//! Everything here is a pure transformation of an HTML body; nothing is
//! fetched or followed.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime};
use scraper::{Html, Node};
use url::Url;

/// Marker that identifies a server-generated directory listing.
pub const INDEX_MARKER: &str = "<title>Index of ";

/// Date layouts used by Apache (`2023-01-15 10:30`) and nginx
/// (`15-Jan-2023 10:30`) listings.
const LISTING_DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%d-%b-%Y %H:%M",
    "%d-%b-%Y %H:%M:%S",
];

/// A file entry found in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Absolute URL of the file.
    pub url: Url,
    /// Size in bytes, when known.
    pub size: Option<u64>,
    /// Last-modified time shown next to the entry, when parseable.
    pub last_modified: Option<NaiveDateTime>,
}

impl DiscoveredFile {
    fn new(url: Url) -> Self {
        Self {
            url,
            size: None,
            last_modified: None,
        }
    }
}

/// Entries extracted from one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Absolute paths (no trailing slash) of subdirectories.
    pub subdirectories: BTreeSet<String>,
    /// Files in the order they appear on the page.
    pub files: Vec<DiscoveredFile>,
}

impl Listing {
    /// Returns the crawl target URL for each subdirectory.
    ///
    /// Targets keep the scheme, host and query of `base` and always end in
    /// `/`, so relative links on the child page resolve against it.
    pub fn directory_urls<'a>(&'a self, base: &'a Url) -> impl Iterator<Item = Url> + 'a {
        self.subdirectories
            .iter()
            .map(move |dir| with_path(base, &format!("{dir}/")))
    }
}

/// Returns true if `body` looks like a server-generated directory listing.
#[must_use]
pub fn is_index_listing(body: &str) -> bool {
    body.contains(INDEX_MARKER)
}

/// Extracts subdirectories and files from a listing served at `base`.
#[must_use]
pub fn extract(base: &Url, html: &str) -> Listing {
    let document = Html::parse_document(html);
    let mut listing = Listing::default();

    // The file whose date is still being looked for, and the anchor that
    // introduced it (its own link text is not a date).
    let mut probe: Option<(usize, _)> = None;

    for node in document.tree.root().descendants() {
        match node.value() {
            Node::Element(element) if element.name() == "a" => {
                probe = None;
                let Some(href) = element.attr("href") else {
                    continue;
                };
                match classify(base.path(), href) {
                    Some(Entry::Directory(path)) => {
                        listing.subdirectories.insert(path);
                    }
                    Some(Entry::File(path)) => {
                        listing.files.push(DiscoveredFile::new(with_path(base, &path)));
                        probe = Some((listing.files.len() - 1, node.id()));
                    }
                    None => {}
                }
            }
            Node::Text(text) => {
                let Some((index, anchor)) = probe else {
                    continue;
                };
                if node.ancestors().any(|a| a.id() == anchor) {
                    continue;
                }
                if let Some(date) = parse_listing_date(text) {
                    listing.files[index].last_modified = Some(date);
                    probe = None;
                }
            }
            _ => {}
        }
    }

    listing
}

enum Entry {
    Directory(String),
    File(String),
}

/// Decides what an href points at, relative to the listing's path.
fn classify(base_path: &str, href: &str) -> Option<Entry> {
    if href.is_empty()
        || href.starts_with("..")
        || href.contains("://")
        || href.starts_with(['?', '#'])
        || has_link_scheme(href)
    {
        return None;
    }

    let href = href.split(['?', '#']).next().unwrap_or_default();
    if href.split('/').any(|segment| segment == "..") {
        return None;
    }

    let path = join_path(base_path, href);
    if href.ends_with('/') {
        // `./` and `/` resolve to the listing itself
        if path == join_path(base_path, "") {
            return None;
        }
        Some(Entry::Directory(path))
    } else {
        Some(Entry::File(path))
    }
}

/// Schemes that never name an entry of the listing. A colon alone does not
/// make a scheme: nginx leaves names like `v1:beta/` unescaped.
const LINK_SCHEMES: [&str; 9] = [
    "http", "https", "ftp", "file", "mailto", "javascript", "data", "tel", "about",
];

fn has_link_scheme(href: &str) -> bool {
    href.split_once(':').is_some_and(|(scheme, _)| {
        LINK_SCHEMES
            .iter()
            .any(|known| scheme.eq_ignore_ascii_case(known))
    })
}

/// Joins `href` onto `base` and cleans the result the way `path.Join` does:
/// `.` segments and empty segments vanish, `..` pops, and there is never a
/// trailing slash (except for the root itself).
#[must_use]
pub fn join_path(base: &str, href: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(href.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

fn with_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_fragment(None);
    url
}

fn parse_listing_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    // Listings follow the date with the size, so only the first two tokens count
    let mut tokens = text.split_whitespace();
    if let (Some(day), Some(time)) = (tokens.next(), tokens.next()) {
        let candidate = format!("{day} {time}");
        for format in LISTING_DATE_FORMATS {
            if let Ok(date) = NaiveDateTime::parse_from_str(&candidate, format) {
                return Some(date);
            }
        }
    }

    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|date| date.naive_utc())
}
