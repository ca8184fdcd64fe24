//! The fixed catalog of news sites, embedded at build time.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const SITES_JSON: &str = include_str!("sites.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsSite {
    pub id: i64,
    pub name: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub description_en: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub article_has_content: bool,
    #[serde(default)]
    pub user_agent_key: Option<String>,
    #[serde(default)]
    pub blocked_title_patterns: Vec<String>,

    #[serde(skip)]
    blocked_title_regexes: Vec<Regex>,
}

impl NewsSite {
    /// True iff any configured pattern matches the whole title.
    pub fn is_blocked_title(&self, title: &str) -> bool {
        self.blocked_title_regexes.iter().any(|re| re.is_match(title))
    }

    fn compile_patterns(&mut self) -> Result<()> {
        self.blocked_title_regexes = self
            .blocked_title_patterns
            .iter()
            .map(|pattern| {
                // Anchor so a pattern only blocks when it covers the full title.
                Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    AppError::config(format!(
                        "site {}: bad blocked title pattern {pattern:?}: {e}",
                        self.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }
}

pub struct SiteCatalog {
    sites: Vec<NewsSite>,
}

impl SiteCatalog {
    /// Loads the embedded catalog. Pattern compilation errors and duplicate
    /// ids are fatal.
    pub fn load() -> Result<Self> {
        Self::from_json(SITES_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut sites: Vec<NewsSite> = serde_json::from_str(json)?;
        for site in &mut sites {
            site.compile_patterns()?;
        }

        let mut seen = std::collections::HashSet::new();
        for site in &sites {
            if !seen.insert(site.id) {
                return Err(AppError::config(format!("duplicate site id {}", site.id)));
            }
        }

        Ok(Self { sites })
    }

    pub fn sites(&self) -> &[NewsSite] {
        &self.sites
    }

    pub fn find_by_id(&self, id: i64) -> Option<&NewsSite> {
        self.sites.iter().find(|s| s.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&NewsSite> {
        self.sites.iter().find(|s| s.name == name)
    }

    pub fn site_name(&self, id: i64) -> String {
        self.find_by_id(id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }
}
