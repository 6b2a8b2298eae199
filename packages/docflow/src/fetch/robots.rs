//! robots.txt rules.
//!
//! Matching follows the longest-prefix rule: the most specific `Allow` or
//! `Disallow` line wins, and `Allow` wins a tie. `*` and `$` wildcards are
//! not interpreted.

use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
struct Group {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt for one origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

impl RobotsRules {
    /// Rules that permit everything (missing or unreadable robots.txt).
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        // Consecutive user-agent lines share one group.
        let mut in_agent_block = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    if !in_agent_block && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_block = true;
                }
                "allow" => {
                    in_agent_block = false;
                    if !value.is_empty() {
                        current.allow.push(value.to_string());
                    }
                }
                "disallow" => {
                    in_agent_block = false;
                    if !value.is_empty() {
                        current.disallow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    in_agent_block = false;
                    current.crawl_delay = value
                        .parse::<f64>()
                        .ok()
                        .filter(|d| d.is_finite() && *d >= 0.0)
                        .map(Duration::from_secs_f64);
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self { groups }
    }

    fn group_for(&self, user_agent: &str) -> Option<&Group> {
        // Product token: "docflow/0.1 (+https://...)" matches "docflow".
        let token = user_agent
            .split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        self.groups
            .iter()
            .find(|g| !token.is_empty() && g.agents.iter().any(|a| a == &token))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
    }

    /// Whether `path` may be fetched by `user_agent`.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        let longest = |rules: &[String]| {
            rules
                .iter()
                .filter(|r| path.starts_with(r.as_str()))
                .map(String::len)
                .max()
        };

        match (longest(&group.allow), longest(&group.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }

    /// `Crawl-delay` for `user_agent`, if declared.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.group_for(user_agent).and_then(|g| g.crawl_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "docflow/0.1";

    #[test]
    fn test_wildcard_group() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /private/\nDisallow: /tmp # scratch\n",
        );

        assert!(rules.is_allowed(UA, "/judgments/a.pdf"));
        assert!(!rules.is_allowed(UA, "/private/a.pdf"));
        assert!(!rules.is_allowed(UA, "/tmpfile"));
    }

    #[test]
    fn test_specific_agent_overrides_wildcard() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: DocFlow\nDisallow: /admin\nCrawl-delay: 2\n",
        );

        assert!(rules.is_allowed(UA, "/orders"));
        assert!(!rules.is_allowed(UA, "/admin/x"));
        assert!(!rules.is_allowed("otherbot", "/orders"));
        assert_eq!(rules.crawl_delay(UA), Some(Duration::from_secs(2)));
        assert_eq!(rules.crawl_delay("otherbot"), None);
    }

    #[test]
    fn test_longest_match_wins() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /docs/\nAllow: /docs/public/\n",
        );

        assert!(rules.is_allowed(UA, "/docs/public/a.pdf"));
        assert!(!rules.is_allowed(UA, "/docs/internal/a.pdf"));
    }

    #[test]
    fn test_shared_agent_block() {
        let rules = RobotsRules::parse("User-agent: a\nUser-agent: docflow\nDisallow: /x\n");
        assert!(!rules.is_allowed(UA, "/x/1"));
        assert!(!rules.is_allowed("a", "/x/1"));
    }

    #[test]
    fn test_empty_and_allow_all() {
        assert!(RobotsRules::parse("").is_allowed(UA, "/anything"));
        assert!(RobotsRules::allow_all().is_allowed(UA, "/"));
        assert!(RobotsRules::parse("User-agent: *\nDisallow:\n").is_allowed(UA, "/"));
    }
}
