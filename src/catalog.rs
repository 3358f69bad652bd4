use std::{fmt, fs, io::BufWriter, path::Path};

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::{
    detail::DetailRecord,
    error::{Error, Result},
};

/// Duration used when a record carries no usable completion time.
pub const DEFAULT_DURATION_MINUTES: u32 = 45;

/// Job level text used when a detail page names none.
pub const DEFAULT_JOB_LEVELS: &str = "All Levels";

/// Canonical two-valued rendering of a support flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Support {
    Yes,
    No,
}

impl From<bool> for Support {
    fn from(value: bool) -> Self {
        if value { Support::Yes } else { Support::No }
    }
}

impl fmt::Display for Support {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Support::Yes => f.write_str("Yes"),
            Support::No => f.write_str("No"),
        }
    }
}

/// One row scraped from a listing page, before its detail page is merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub name: String,
    pub url: Url,
    pub remote_support: bool,
    pub adaptive_support: bool,
    pub test_type: Vec<String>,
}

/// A complete catalog entry. Identity is the canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub url: String,
    pub name: String,
    #[serde(with = "support_flag", default = "default_remote_support")]
    pub remote_support: bool,
    #[serde(with = "support_flag", default)]
    pub adaptive_support: bool,
    #[serde(default, deserialize_with = "lenient_codes")]
    pub test_type: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_minutes")]
    pub duration: Option<u32>,
    #[serde(
        default = "default_job_levels",
        deserialize_with = "job_levels_or_default"
    )]
    pub job_levels: String,
}

impl CatalogRecord {
    /// Merge a listing row with its (possibly defaulted) detail fields.
    pub fn assemble(row: ListingRow, detail: DetailRecord) -> Self {
        Self {
            url: row.url.to_string(),
            name: row.name,
            remote_support: row.remote_support,
            adaptive_support: row.adaptive_support,
            test_type: row.test_type,
            description: detail.description,
            duration: Some(detail.duration),
            job_levels: detail.job_levels,
        }
    }

    /// The text rendering embedded at index time and scored at query time.
    ///
    /// Both stages must see the exact same string for a record, so this is
    /// the only place the rendering is defined.
    pub fn rich_context(&self) -> String {
        format!(
            "Assessment Name: {}. Category: {}. Target Level: {}. Description: {}",
            self.name,
            self.test_type.join(", "),
            self.job_levels,
            self.description
        )
    }
}

/// Parse a duration such as `30`, `"30 mins"` or `"45 minutes"`.
///
/// Returns `None` for anything that does not reduce to a positive integer.
pub fn parse_minutes(raw: &str) -> Option<u32> {
    let lowered = raw.trim().to_lowercase();
    let digits = ["minutes", "minute", "mins", "min"]
        .iter()
        .find_map(|suffix| lowered.strip_suffix(suffix))
        .unwrap_or(&lowered)
        .trim();
    digits.parse::<u32>().ok().filter(|&m| m > 0)
}

/// Read a catalog artifact from disk.
pub fn read_catalog(path: &Path) -> Result<Vec<CatalogRecord>> {
    let bytes = fs::read(path).map_err(|e| {
        Error::Config(format!(
            "cannot read catalog {}: {e}",
            path.display()
        ))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write a catalog artifact, replacing any previous file atomically.
pub fn write_catalog(path: &Path, records: &[CatalogRecord]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|_| Error::DataDir(parent.to_path_buf()))?;
    }

    let tmp = path.with_extension("json.tmp");
    {
        let file = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, records)?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn default_remote_support() -> bool {
    true
}

fn default_job_levels() -> String {
    DEFAULT_JOB_LEVELS.to_string()
}

mod support_flag {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use super::Support;

    pub fn serialize<S: Serializer>(
        value: &bool,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&Support::from(*value))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<bool, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => Ok(b),
            Raw::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => Ok(true),
                "no" | "n" | "false" | "0" | "" => Ok(false),
                other => Err(D::Error::custom(format!(
                    "unrecognized support flag: {other}"
                ))),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMinutes {
    Number(i64),
    Float(f64),
    Text(String),
}

fn lenient_minutes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error> {
    let raw = Option::<RawMinutes>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawMinutes::Number(n)) => u32::try_from(n).ok().filter(|&m| m > 0),
        Some(RawMinutes::Float(f)) if f >= 1.0 && f <= u32::MAX as f64 => {
            Some(f.round() as u32)
        }
        Some(RawMinutes::Float(_)) => None,
        Some(RawMinutes::Text(s)) => parse_minutes(&s),
        None => None,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCodes {
    List(Vec<String>),
    Joined(String),
}

fn lenient_codes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<RawCodes>::deserialize(deserializer)? {
        Some(RawCodes::List(codes)) => codes,
        Some(RawCodes::Joined(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    })
}

fn null_as_default<'de, D, T>(
    deserializer: D,
) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn job_levels_or_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default_job_levels))
}
