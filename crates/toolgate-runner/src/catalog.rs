//! Local install catalog
//!
//! The search-and-install flow matches operator queries against a local
//! database of known tool servers. Scoring is a deterministic keyword
//! match over name, description and tags; the best candidates can then
//! be installed through the process runner.

use serde::{Deserialize, Serialize};

use toolgate_core::{Capability, ParamSchema, ParamType};

/// One installable server known to the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    /// argv used to launch the server
    pub command: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A scored catalog hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMatch {
    pub score: f64,
    pub entry: CatalogEntry,
}

/// The local server database
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// The server set bundled into the build.
    pub fn bundled() -> Self {
        Self::new(vec![
            CatalogEntry {
                id: "python-executor".into(),
                name: "Python Executor Server".into(),
                description: "Sandboxed Python code execution".into(),
                command: vec!["python-executor-server".into()],
                capabilities: vec![Capability::new("python_execute", "Execute Python code")
                    .with_param(
                        "code",
                        ParamSchema::required(ParamType::String, "Code to execute"),
                    )],
                tags: vec!["python".into(), "sandbox".into(), "code".into()],
            },
            CatalogEntry {
                id: "browser-navigator".into(),
                name: "Browser Navigator Server".into(),
                description: "Headless browser navigation and scraping".into(),
                command: vec!["browser-navigator-server".into()],
                capabilities: vec![
                    Capability::new("navigate", "Open a URL").with_param(
                        "url",
                        ParamSchema::required(ParamType::String, "Target URL"),
                    ),
                    Capability::new("extract_text", "Extract page text"),
                ],
                tags: vec!["browser".into(), "web".into(), "automation".into()],
            },
            CatalogEntry {
                id: "web-search".into(),
                name: "Web Search Server".into(),
                description: "Multi-engine web search and research".into(),
                command: vec!["search-tool-server".into()],
                capabilities: vec![Capability::new("search_web", "Search the web")
                    .with_param(
                        "query",
                        ParamSchema::required(ParamType::String, "Search query"),
                    )
                    .with_param(
                        "max_results",
                        ParamSchema::optional(ParamType::Integer, "Result cap")
                            .with_default(serde_json::json!(10)),
                    )],
                tags: vec!["search".into(), "web".into(), "research".into()],
            },
        ])
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Rank entries against a query and optional capability tags.
    ///
    /// Weights: name hit 0.5, description word hit 0.3, each tag hit
    /// 0.2, capped at 1.0. Zero-score entries are dropped.
    pub fn search(&self, query: &str, capability_tags: &[String]) -> Vec<CatalogMatch> {
        let query_lower = query.trim().to_lowercase();
        let mut matches: Vec<CatalogMatch> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = score_entry(entry, &query_lower, capability_tags);
                (score > 0.0).then(|| CatalogMatch {
                    score,
                    entry: entry.clone(),
                })
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

fn score_entry(entry: &CatalogEntry, query_lower: &str, capability_tags: &[String]) -> f64 {
    let mut score: f64 = 0.0;

    if !query_lower.is_empty() {
        if entry.name.to_lowercase().contains(query_lower)
            || entry.id.to_lowercase().contains(query_lower)
        {
            score += 0.5;
        }
        let description = entry.description.to_lowercase();
        if query_lower
            .split_whitespace()
            .any(|word| description.contains(word))
        {
            score += 0.3;
        }
    }

    for tag in capability_tags {
        let tag_lower = tag.to_lowercase();
        if entry.tags.iter().any(|t| t.to_lowercase() == tag_lower) {
            score += 0.2;
        }
    }

    score.min(1.0)
}
