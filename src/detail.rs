//! Detail-page extraction.
//!
//! Every field is extracted into an `Option`; a miss is never an error.
//! [`DetailFields::resolve`] is the single place where defaults apply.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::{
    catalog::{DEFAULT_DURATION_MINUTES, DEFAULT_JOB_LEVELS},
    text_util::{STORED_DESCRIPTION_MAX_CHARS, clean_text, truncate_chars},
};

static CONTENT_REGION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".product-detail__content").expect("valid selector")
});

/// Phrasings a detail page uses for its completion time, most specific first.
static DURATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)time in minutes\s*=?\s*(\d+)",
        r"(?i)completion time\D{0,60}?(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid duration regex"))
    .collect()
});

/// Looser phrasing only trusted when re-deriving from stored descriptions.
static MINUTES_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*mins?\b").expect("valid minutes regex")
});

static JOB_LEVELS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Job levels\s+(.*?)\s*(?:Languages|Assessment length|Test Type|Downloads|Product Fact|$)",
    )
    .expect("valid job levels regex")
});

static LEADING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Description\b\s*").expect("valid label regex")
});

static DESCRIPTION_SLICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Description\s*(.*?)\s*(?:Job levels|Languages|Assessment length|Product Fact)",
    )
    .expect("valid description regex")
});

/// Raw extraction result of one detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub duration: Option<u32>,
    pub job_levels: Option<String>,
    pub description: Option<String>,
}

/// Detail fields after defaults have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRecord {
    pub duration: u32,
    pub job_levels: String,
    pub description: String,
}

impl Default for DetailRecord {
    fn default() -> Self {
        DetailFields::default().resolve()
    }
}

impl DetailFields {
    pub fn resolve(self) -> DetailRecord {
        DetailRecord {
            duration: self.duration.unwrap_or(DEFAULT_DURATION_MINUTES),
            job_levels: self
                .job_levels
                .unwrap_or_else(|| DEFAULT_JOB_LEVELS.to_string()),
            description: self.description.unwrap_or_default(),
        }
    }
}

/// Parse a fetched detail page.
pub fn parse_detail(html: &str) -> DetailFields {
    let document = Html::parse_document(html);
    let text = visible_text(document.root_element());

    DetailFields {
        duration: extract_duration(&text),
        job_levels: extract_job_levels(&text),
        description: extract_description(&document, &text),
    }
}

/// Concatenate all visible text nodes under `root`, trimmed and joined by
/// single spaces. Script and style bodies are skipped.
pub fn visible_text(root: ElementRef<'_>) -> String {
    root.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .parent()
                .and_then(|parent| parent.value().as_element())
                .is_some_and(|el| {
                    matches!(el.name(), "script" | "style" | "noscript")
                });
            (!hidden).then(|| text.trim())
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Completion time in minutes, from the detail-page phrasings.
pub fn extract_duration(text: &str) -> Option<u32> {
    DURATION_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .filter(|&m| m > 0)
    })
}

/// Completion time from a stored description: the detail-page phrasings
/// first, then a bare "N mins".
pub fn derive_duration(description: &str) -> Option<u32> {
    extract_duration(description).or_else(|| {
        MINUTES_SUFFIX
            .captures(description)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .filter(|&m| m > 0)
    })
}

/// Text between the "Job levels" label and the next section label.
pub fn extract_job_levels(text: &str) -> Option<String> {
    let caps = JOB_LEVELS.captures(text)?;
    let levels = clean_text(&caps[1]);
    let levels = levels.trim_end_matches([',', ' ']);
    (!levels.is_empty()).then(|| levels.to_string())
}

fn extract_description(document: &Html, text: &str) -> Option<String> {
    let from_region = document
        .select(&CONTENT_REGION)
        .next()
        .map(|region| {
            let text = clean_text(&visible_text(region));
            LEADING_LABEL.replace(&text, "").into_owned()
        })
        .filter(|d| !d.is_empty());

    let description = from_region.or_else(|| {
        DESCRIPTION_SLICE
            .captures(text)
            .map(|caps| clean_text(&caps[1]))
            .filter(|d| !d.is_empty())
    })?;

    Some(truncate_chars(&description, STORED_DESCRIPTION_MAX_CHARS))
}
