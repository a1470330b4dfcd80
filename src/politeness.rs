//! Politeness engine: per-domain robots bootstrap, ban tracking and permission checks.
//!
//! Each domain (keyed by lower-cased host) owns a once-only gate. The first
//! caller to reach an unset gate runs the bootstrap, every concurrent caller
//! waits on the same gate, and the resulting record never changes for the
//! life of the process.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::robots::RobotsPolicy;
use crate::url_utils;

/// Sitemap locations tried when robots advertises none.
pub const CONVENTIONAL_SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemapindex.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/post-sitemap",
    "/page-sitemap",
];

/// What the network returned for a domain's robots resource.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotsFetch {
    /// Body of a successful fetch.
    Fetched(String),
    /// Missing, unreadable or failed fetch. Treated as allow-all, never as a ban.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Bootstrap {
    /// Homepage plus sitemap links to admit to the frontier.
    Seeds(Vec<String>),
    /// Domain disallows crawling entirely.
    Banned,
}

/// Politeness record of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub host: String,
    pub root: String,
    pub policy: RobotsPolicy,
    pub banned: bool,
}

impl DomainRecord {
    /// Links a freshly bootstrapped domain contributes: its homepage and sitemaps.
    pub fn seed_links(&self) -> Vec<String> {
        let mut links = vec![self.root.clone()];
        if self.policy.sitemaps().is_empty() {
            links.extend(
                CONVENTIONAL_SITEMAP_PATHS
                    .iter()
                    .map(|path| format!("{}{}", self.root, path)),
            );
        } else {
            links.extend(self.policy.sitemaps().iter().cloned());
        }
        links
    }

    pub fn bootstrap(&self) -> Bootstrap {
        if self.banned {
            Bootstrap::Banned
        } else {
            Bootstrap::Seeds(self.seed_links())
        }
    }
}

/// Result of waiting on a domain's gate.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub record: DomainRecord,
    /// True when this call performed the bootstrap.
    pub fresh: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PolitenessError {
    #[error("URL has no host: {0}")]
    NoHost(String),

    #[error("timed out waiting for robots bootstrap of {0}")]
    GateTimeout(String),
}

pub struct Politeness {
    agent_token: String,
    records: DashMap<String, Arc<OnceCell<DomainRecord>>>,
    gate_wait: Duration,
}

impl Politeness {
    /// `user_agent` may carry a version suffix; only the product token is matched.
    pub fn new(user_agent: &str, gate_wait: Duration) -> Self {
        let agent_token = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .trim()
            .to_string();
        Self {
            agent_token,
            records: DashMap::new(),
            gate_wait,
        }
    }

    fn gate(&self, host: &str) -> Arc<OnceCell<DomainRecord>> {
        self.records
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn build_record(&self, host: String, root: String, fetch: RobotsFetch) -> DomainRecord {
        let policy = match fetch {
            RobotsFetch::Fetched(text) => RobotsPolicy::parse(&text, &self.agent_token),
            RobotsFetch::Unavailable => RobotsPolicy::allow_all(),
        };
        let banned = policy.disallows_site(&root, &self.agent_token);
        if banned {
            tracing::warn!(domain = %root, "robots.txt disallows the whole domain, banning it");
        } else {
            tracing::info!(
                domain = %root,
                sitemaps = policy.sitemaps().len(),
                "recorded robots policy"
            );
        }
        DomainRecord {
            host,
            root,
            policy,
            banned,
        }
    }

    /// Record the robots policy for the domain of `url` from an already-fetched result.
    ///
    /// Idempotent: if the domain was bootstrapped before, the stored record
    /// wins and the new fetch result is ignored.
    pub fn bootstrap_domain(&self, url: &str, fetch: RobotsFetch) -> Result<Bootstrap, PolitenessError> {
        let (host, root) = host_and_root(url)?;
        let gate = self.gate(&host);
        if gate.get().is_none() {
            let record = self.build_record(host, root, fetch);
            // Losing a set race is fine; the winner's record is authoritative.
            let _ = gate.set(record);
        }
        match gate.get() {
            Some(record) => Ok(record.bootstrap()),
            None => Ok(Bootstrap::Seeds(Vec::new())),
        }
    }

    /// Wait for the domain of `url` to be bootstrapped, running `fetch_robots`
    /// if no one has started it yet.
    pub async fn ensure_bootstrapped<F, Fut>(
        &self,
        url: &str,
        fetch_robots: F,
    ) -> Result<GateOutcome, PolitenessError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RobotsFetch>,
    {
        let (host, root) = host_and_root(url)?;
        let gate = self.gate(&host);
        if let Some(record) = gate.get() {
            return Ok(GateOutcome {
                record: record.clone(),
                fresh: false,
            });
        }

        let mut fresh = false;
        let init = gate.get_or_init(|| async {
            fresh = true;
            let fetch = fetch_robots().await;
            self.build_record(host.clone(), root.clone(), fetch)
        });
        let record = tokio::time::timeout(self.gate_wait, init)
            .await
            .map_err(|_| PolitenessError::GateTimeout(root.clone()))?
            .clone();

        Ok(GateOutcome { record, fresh })
    }

    /// Whether `url` may be fetched. `None` when its domain has no record yet,
    /// which means the caller skipped the bootstrap step.
    pub fn is_permitted(&self, url: &str) -> Option<bool> {
        let host = url_utils::extract_host(url)?;
        let gate = self.records.get(&host)?.clone();
        let record = gate.get()?;
        Some(!record.banned && record.policy.is_allowed(url, &self.agent_token))
    }

    pub fn is_bootstrapped(&self, host: &str) -> bool {
        self.records
            .get(host)
            .map(|gate| gate.initialized())
            .unwrap_or(false)
    }

    pub fn is_banned(&self, host: &str) -> bool {
        self.records
            .get(host)
            .and_then(|gate| gate.get().map(|r| r.banned))
            .unwrap_or(false)
    }

    pub fn crawl_delay(&self, host: &str) -> Option<Duration> {
        self.records
            .get(host)
            .and_then(|gate| gate.get().and_then(|r| r.policy.crawl_delay_secs()))
            .map(Duration::from_secs)
    }

    /// All recorded domains, for persistence across restarts.
    pub fn snapshot(&self) -> Vec<DomainRecord> {
        let mut records: Vec<DomainRecord> = self
            .records
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        records.sort_by(|a, b| a.host.cmp(&b.host));
        records
    }

    pub fn restore(&self, records: Vec<DomainRecord>) {
        for record in records {
            let gate = self.gate(&record.host);
            let _ = gate.set(record);
        }
    }

    pub fn domain_count(&self) -> usize {
        self.records.len()
    }
}

fn host_and_root(url: &str) -> Result<(String, String), PolitenessError> {
    let host = url_utils::extract_host(url).ok_or_else(|| PolitenessError::NoHost(url.to_string()))?;
    let root = url_utils::domain_root(url).ok_or_else(|| PolitenessError::NoHost(url.to_string()))?;
    Ok((host, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> Politeness {
        Politeness::new("AcademicCrawler/0.1", Duration::from_secs(5))
    }

    #[test]
    fn test_bootstrap_returns_homepage_and_sitemaps() {
        let politeness = engine();
        let robots = "User-agent: *\nDisallow: /secret/\nSitemap: https://www.ics.uci.edu/sitemap_index.xml\n";
        let result = politeness
            .bootstrap_domain("https://www.ics.uci.edu/robots.txt", RobotsFetch::Fetched(robots.into()))
            .unwrap();

        assert_eq!(
            result,
            Bootstrap::Seeds(vec![
                "https://www.ics.uci.edu".to_string(),
                "https://www.ics.uci.edu/sitemap_index.xml".to_string(),
            ])
        );
        assert_eq!(politeness.is_permitted("https://www.ics.uci.edu/about"), Some(true));
        assert_eq!(politeness.is_permitted("https://www.ics.uci.edu/secret/x"), Some(false));
    }

    #[test]
    fn test_conventional_sitemaps_when_none_advertised() {
        let politeness = engine();
        let result = politeness
            .bootstrap_domain("https://cs.uci.edu/robots.txt", RobotsFetch::Fetched("User-agent: *\n".into()))
            .unwrap();
        match result {
            Bootstrap::Seeds(links) => {
                assert_eq!(links[0], "https://cs.uci.edu");
                assert!(links.contains(&"https://cs.uci.edu/sitemap.xml".to_string()));
                assert_eq!(links.len(), 1 + CONVENTIONAL_SITEMAP_PATHS.len());
            }
            Bootstrap::Banned => panic!("domain should not be banned"),
        }
    }

    #[test]
    fn test_disallow_all_bans_domain() {
        let politeness = engine();
        let result = politeness
            .bootstrap_domain(
                "https://stat.uci.edu/robots.txt",
                RobotsFetch::Fetched("User-agent: *\nDisallow: /\n".into()),
            )
            .unwrap();
        assert_eq!(result, Bootstrap::Banned);
        assert!(politeness.is_banned("stat.uci.edu"));
        assert_eq!(politeness.is_permitted("https://stat.uci.edu/people"), Some(false));
    }

    #[test]
    fn test_fetch_failure_is_fail_open() {
        let politeness = engine();
        let result = politeness
            .bootstrap_domain("https://informatics.uci.edu/robots.txt", RobotsFetch::Unavailable)
            .unwrap();
        assert!(matches!(result, Bootstrap::Seeds(_)));
        assert!(!politeness.is_banned("informatics.uci.edu"));
        assert_eq!(politeness.is_permitted("https://informatics.uci.edu/x"), Some(true));
    }

    #[test]
    fn test_unknown_domain_is_not_answered() {
        let politeness = engine();
        assert_eq!(politeness.is_permitted("https://www.ics.uci.edu/about"), None);
        assert!(!politeness.is_bootstrapped("www.ics.uci.edu"));
    }

    #[test]
    fn test_record_is_immutable_once_set() {
        let politeness = engine();
        politeness
            .bootstrap_domain("https://cs.uci.edu/robots.txt", RobotsFetch::Unavailable)
            .unwrap();
        let second = politeness
            .bootstrap_domain(
                "https://cs.uci.edu/robots.txt",
                RobotsFetch::Fetched("User-agent: *\nDisallow: /\n".into()),
            )
            .unwrap();
        assert!(matches!(second, Bootstrap::Seeds(_)));
        assert!(!politeness.is_banned("cs.uci.edu"));
    }

    #[tokio::test]
    async fn test_ensure_bootstrapped_runs_once() {
        let politeness = Arc::new(engine());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let politeness = Arc::clone(&politeness);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                politeness
                    .ensure_bootstrapped("https://www.ics.uci.edu/page", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        RobotsFetch::Fetched("User-agent: *\nDisallow: /private\n".into())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut fresh_count = 0;
        for handle in handles {
            if handle.await.unwrap().fresh {
                fresh_count += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fresh_count, 1);
        assert_eq!(politeness.is_permitted("https://www.ics.uci.edu/private"), Some(false));
    }

    #[tokio::test]
    async fn test_waiter_times_out_while_bootstrap_in_progress() {
        let politeness = Arc::new(Politeness::new("AcademicCrawler", Duration::from_millis(50)));

        let slow = {
            let politeness = Arc::clone(&politeness);
            tokio::spawn(async move {
                politeness
                    .ensure_bootstrapped("https://cs.uci.edu/a", || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        RobotsFetch::Unavailable
                    })
                    .await
            })
        };
        slow.await.unwrap().unwrap();

        let timed_out = politeness
            .ensure_bootstrapped("https://stat.uci.edu/a", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                RobotsFetch::Unavailable
            })
            .await;
        assert!(matches!(timed_out, Err(PolitenessError::GateTimeout(_))));
        assert!(!politeness.is_bootstrapped("stat.uci.edu"));
    }

    #[test]
    fn test_snapshot_and_restore() {
        let politeness = engine();
        politeness
            .bootstrap_domain(
                "https://cs.uci.edu/robots.txt",
                RobotsFetch::Fetched("User-agent: *\nCrawl-delay: 2\n".into()),
            )
            .unwrap();

        let restored = engine();
        restored.restore(politeness.snapshot());
        assert!(restored.is_bootstrapped("cs.uci.edu"));
        assert_eq!(restored.crawl_delay("cs.uci.edu"), Some(Duration::from_secs(2)));
        assert_eq!(restored.domain_count(), 1);
    }
}
