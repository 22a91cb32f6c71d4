//! Keyword intent router.
//!
//! Maps a free-text question to one of five [`Category`] values using
//! case-insensitive substring rules evaluated in a fixed priority order.
//! The first rule with a matching keyword wins; questions matching no rule
//! fall through to [`Category::Qa`]. Classification is pure and total.
//!
//! | Priority | Category | Keywords |
//! |----------|----------|----------|
//! | 1 | `summary` | summary, summarize |
//! | 2 | `ats` | ats, resume, score |
//! | 3 | `explanation` | explain, meaning, theme |
//! | 4 | `citation` | reference, citation |
//! | (none) | `qa` | (default) |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task category selected for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Summary,
    Ats,
    Explanation,
    Citation,
    Qa,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Summary,
        Category::Ats,
        Category::Explanation,
        Category::Citation,
        Category::Qa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Summary => "summary",
            Category::Ats => "ats",
            Category::Explanation => "explanation",
            Category::Citation => "citation",
            Category::Qa => "qa",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown category: '{}'", s))
    }
}

/// Rules in evaluation order.
const RULES: &[(Category, &[&str])] = &[
    (Category::Summary, &["summary", "summarize"]),
    (Category::Ats, &["ats", "resume", "score"]),
    (Category::Explanation, &["explain", "meaning", "theme"]),
    (Category::Citation, &["reference", "citation"]),
];

/// Classify a question. Never fails.
pub fn classify(question: &str) -> Category {
    let q = question.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| q.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Qa)
}
