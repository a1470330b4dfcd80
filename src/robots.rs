use robotstxt::DefaultMatcher;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Parsed robots-exclusion policy of one domain.
///
/// The raw text is kept so allowance checks can be answered by the Google
/// matcher; sitemaps and crawl delay are extracted once at parse time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotsPolicy {
    text: String,
    sitemaps: Vec<String>,
    crawl_delay_secs: Option<u64>,
}

impl RobotsPolicy {
    pub fn parse(text: &str, user_agent: &str) -> Self {
        Self {
            text: text.to_string(),
            sitemaps: extract_sitemaps(text),
            crawl_delay_secs: extract_crawl_delay(text, user_agent),
        }
    }

    /// Policy used when the robots resource is missing or unreadable.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Sitemap URLs advertised by `Sitemap:` lines, in file order.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Requested delay, capped at [`Config::MAX_CRAWL_DELAY_SECS`].
    pub fn crawl_delay_secs(&self) -> Option<u64> {
        self.crawl_delay_secs
            .map(|delay| delay.min(Config::MAX_CRAWL_DELAY_SECS))
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.text.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.text, user_agent, url)
    }

    /// True when the domain root itself is off limits, i.e. `Disallow: /`.
    pub fn disallows_site(&self, domain_root: &str, user_agent: &str) -> bool {
        !self.is_allowed(&format!("{}/", domain_root.trim_end_matches('/')), user_agent)
    }
}

fn extract_sitemaps(text: &str) -> Vec<String> {
    let mut sitemaps = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("sitemap") {
                let value = value.trim();
                if !value.is_empty() && !sitemaps.iter().any(|s| s == value) {
                    sitemaps.push(value.to_string());
                }
            }
        }
    }
    sitemaps
}

/// `Crawl-delay` of the group naming our agent, else of the `*` group,
/// rounded up to whole seconds.
///
/// Consecutive `User-agent` lines share one group; the group ends at the
/// first `User-agent` line that follows a rule line.
fn extract_crawl_delay(text: &str, user_agent: &str) -> Option<u64> {
    let agent_token = user_agent.split('/').next().unwrap_or(user_agent).trim();
    let mut group_specific = false;
    let mut group_wildcard = false;
    let mut reading_agents = false;
    let mut specific_delay = None;
    let mut wildcard_delay = None;

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !reading_agents {
                    group_specific = false;
                    group_wildcard = false;
                    reading_agents = true;
                }
                if value == "*" {
                    group_wildcard = true;
                } else if value.eq_ignore_ascii_case(agent_token) {
                    group_specific = true;
                }
            }
            "crawl-delay" => {
                reading_agents = false;
                let Some(delay) = parse_delay(value) else {
                    continue;
                };
                if group_specific {
                    specific_delay.get_or_insert(delay);
                } else if group_wildcard {
                    wildcard_delay.get_or_insert(delay);
                }
            }
            "allow" | "disallow" => reading_agents = false,
            _ => {}
        }
    }

    specific_delay.or(wildcard_delay)
}

fn parse_delay(value: &str) -> Option<u64> {
    let delay = value.split_whitespace().next()?.parse::<f64>().ok()?;
    (delay.is_finite() && delay >= 0.0).then(|| delay.ceil() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str = "AcademicCrawler/0.1";

    #[test]
    fn test_robots_rules() {
        let content = r#"
User-agent: *
Disallow: /private/
Disallow: /admin/
Allow: /private/open/

Sitemap: https://www.ics.uci.edu/sitemap.xml
"#;
        let robots = RobotsPolicy::parse(content, AGENT);

        assert!(!robots.is_allowed("https://www.ics.uci.edu/private/x", AGENT));
        assert!(!robots.is_allowed("https://www.ics.uci.edu/admin/", AGENT));
        assert!(robots.is_allowed("https://www.ics.uci.edu/private/open/page", AGENT));
        assert!(robots.is_allowed("https://www.ics.uci.edu/about", AGENT));
        assert!(!robots.disallows_site("https://www.ics.uci.edu", AGENT));
        assert_eq!(robots.sitemaps(), ["https://www.ics.uci.edu/sitemap.xml"]);
    }

    #[test]
    fn test_disallow_everything() {
        let robots = RobotsPolicy::parse("User-agent: *\nDisallow: /\n", AGENT);
        assert!(robots.disallows_site("https://cs.uci.edu", AGENT));
        assert!(!robots.is_allowed("https://cs.uci.edu/anything", AGENT));
    }

    #[test]
    fn test_specific_agent_group_only() {
        let content = "User-agent: SomeOtherBot\nDisallow: /\n\nUser-agent: *\nDisallow: /tmp/\n";
        let robots = RobotsPolicy::parse(content, AGENT);
        assert!(!robots.disallows_site("https://stat.uci.edu", AGENT));
        assert!(!robots.is_allowed("https://stat.uci.edu/tmp/a", AGENT));
    }

    #[test]
    fn test_empty_and_allow_all() {
        assert!(RobotsPolicy::allow_all().is_allowed("https://cs.uci.edu/x", AGENT));
        let robots = RobotsPolicy::parse("User-agent: *\nDisallow:\n", AGENT);
        assert!(robots.is_allowed("https://cs.uci.edu/x", AGENT));
        assert!(robots.sitemaps().is_empty());
    }

    #[test]
    fn test_crawl_delay() {
        let content = "User-agent: *\nCrawl-delay: 1.5\n\nUser-agent: Other\nCrawl-delay: 30\n";
        assert_eq!(RobotsPolicy::parse(content, AGENT).crawl_delay_secs(), Some(2));
        assert_eq!(RobotsPolicy::parse("User-agent: *\n", AGENT).crawl_delay_secs(), None);
    }

    #[test]
    fn test_crawl_delay_shared_agent_group() {
        let content = "User-agent: AcademicCrawler\nUser-agent: OtherBot\nCrawl-delay: 10\n";
        assert_eq!(RobotsPolicy::parse(content, AGENT).crawl_delay_secs(), Some(10));
    }

    #[test]
    fn test_crawl_delay_specific_group_beats_wildcard() {
        let content = "User-agent: academiccrawler\nDisallow: /tmp/\nCrawl-delay: 7\n\nUser-agent: *\nCrawl-delay: 1\n";
        assert_eq!(RobotsPolicy::parse(content, AGENT).crawl_delay_secs(), Some(7));

        let wildcard_first = "User-agent: *\nCrawl-delay: 1\n\nUser-agent: AcademicCrawler\nCrawl-delay: 4 # seconds\n";
        assert_eq!(RobotsPolicy::parse(wildcard_first, AGENT).crawl_delay_secs(), Some(4));
    }

    #[test]
    fn test_crawl_delay_group_ends_after_rules() {
        // The second User-agent line opens a new group that does not include us.
        let content = "User-agent: AcademicCrawler\nDisallow: /x/\nUser-agent: OtherBot\nCrawl-delay: 10\n";
        assert_eq!(RobotsPolicy::parse(content, AGENT).crawl_delay_secs(), None);
    }

    #[test]
    fn test_crawl_delay_is_capped() {
        let robots = RobotsPolicy::parse("User-agent: *\nCrawl-delay: 86400\n", AGENT);
        assert_eq!(robots.crawl_delay_secs(), Some(Config::MAX_CRAWL_DELAY_SECS));
    }

    #[test]
    fn test_sitemap_lines_are_case_insensitive_and_deduplicated() {
        let content = "sitemap: https://cs.uci.edu/a.xml\nSITEMAP: https://cs.uci.edu/a.xml\nSitemap: https://cs.uci.edu/b.xml\n";
        let robots = RobotsPolicy::parse(content, AGENT);
        assert_eq!(
            robots.sitemaps(),
            ["https://cs.uci.edu/a.xml", "https://cs.uci.edu/b.xml"]
        );
    }
}
