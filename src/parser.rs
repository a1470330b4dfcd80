use scraper::{Html, Node, Selector};
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::OnceLock;

use crate::url_utils;

/// English stop words dropped before term weighting.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren't", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can't", "cannot", "could", "couldn't", "did", "didn't", "do", "does", "doesn't",
    "doing", "don't", "down", "during", "each", "few", "for", "from", "further", "had", "hadn't",
    "has", "hasn't", "have", "haven't", "having", "he", "he'd", "he'll", "he's", "her", "here",
    "here's", "hers", "herself", "him", "himself", "his", "how", "how's", "i", "i'd", "i'll",
    "i'm", "i've", "if", "in", "into", "is", "isn't", "it", "it's", "its", "itself", "let's", "me",
    "more", "most", "mustn't", "my", "myself", "no", "nor", "not", "of", "off", "on", "once",
    "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over", "own", "same",
    "shan't", "she", "she'd", "she'll", "she's", "should", "shouldn't", "so", "some", "such",
    "than", "that", "that's", "the", "their", "theirs", "them", "themselves", "then", "there",
    "there's", "these", "they", "they'd", "they'll", "they're", "they've", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "wasn't", "we", "we'd",
    "we'll", "we're", "we've", "were", "weren't", "what", "what's", "when", "when's", "where",
    "where's", "which", "while", "who", "who's", "whom", "why", "why's", "with", "won't",
    "would", "wouldn't", "you", "you'd", "you'll", "you're", "you've", "your", "yours",
    "yourself", "yourselves",
];

fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

fn anchor_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("static selector"))
}

/// Weighted vocabulary of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    /// Every token on the page, stop words included.
    pub word_count: usize,
    /// Relevant terms and their raw frequencies.
    pub terms: HashMap<String, u32>,
}

/// Whether a body is a sitemap: its root element is `<urlset>` or
/// `<sitemapindex>`. The XML prolog, doctype and comments are skipped, so an
/// XHTML page with an `<?xml` header is still HTML.
pub fn is_sitemap_document(body: &str) -> bool {
    let mut rest = body.trim_start_matches('\u{feff}').trim_start();
    loop {
        let skipped = if rest.starts_with("<?") {
            rest.find("?>").map(|end| end + 2)
        } else if rest.starts_with("<!--") {
            rest.find("-->").map(|end| end + 3)
        } else if rest.starts_with("<!") {
            rest.find('>').map(|end| end + 1)
        } else {
            break;
        };
        match skipped {
            Some(end) => rest = rest[end..].trim_start(),
            None => return false,
        }
    }
    rest.starts_with("<urlset") || rest.starts_with("<sitemapindex")
}

/// Extract every outbound link of a page as an absolute, de-fragmented URL.
///
/// Sitemaps contribute their `<loc>` entries; everything else (or a sitemap
/// with no readable entries) its anchor hrefs. Relative references resolve
/// against `base`.
pub fn extract_links(base: &str, body: &str) -> Vec<String> {
    if is_sitemap_document(body) {
        let locs = extract_sitemap_locs(base, body);
        if !locs.is_empty() {
            return locs;
        }
    }

    let document = Html::parse_document(body);
    document
        .select(anchor_selector())
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| url_utils::resolve_link(base, href))
        .collect()
}

fn extract_sitemap_locs(base: &str, body: &str) -> Vec<String> {
    let mut links = Vec::new();
    for entity in SiteMapReader::new(Cursor::new(body.as_bytes())) {
        let loc = match entity {
            SiteMapEntity::Url(entry) => entry.loc,
            SiteMapEntity::SiteMap(entry) => entry.loc,
            _ => continue,
        };
        if let Some(url) = loc.get_url() {
            if let Some(link) = url_utils::resolve_link(base, url.as_str()) {
                links.push(link);
            }
        }
    }
    links
}

/// Visible text of an HTML document, tokenized and weighted.
pub fn extract_text(body: &str) -> PageText {
    let document = Html::parse_document(body);
    let mut page = PageText::default();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|e| e.name()))
            .map(|name| matches!(name, "script" | "style" | "noscript"))
            .unwrap_or(false);
        if hidden {
            continue;
        }

        for token in tokenize(text) {
            page.word_count += 1;
            if is_relevant_word(&token) {
                *page.terms.entry(token).or_insert(0) += 1;
            }
        }
    }

    page
}

/// Lower-cased runs of ASCII alphanumerics.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn is_relevant_word(word: &str) -> bool {
    word.len() > 1 && !stopwords().contains(word)
}
