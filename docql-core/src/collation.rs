//! String collation for sorting
//!
//! A small subset of ICU collation: case folding by strength, case-first
//! ordering, numeric ordering of digit runs, and `shifted` handling of
//! punctuation and whitespace. Accent folding is not performed.

use crate::error::{bail, ensure, Result};
use crate::value::{compare, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which case variant sorts first at tertiary strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseFirst {
    Upper,
    Lower,
    #[default]
    Off,
}

/// Treatment of whitespace and punctuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alternate {
    #[default]
    NonIgnorable,
    Shifted,
}

/// Collation settings attached to options, sorts and cursors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CollationSpec {
    pub locale: String,
    pub case_level: bool,
    pub case_first: CaseFirst,
    pub strength: u8,
    pub numeric_ordering: bool,
    pub alternate: Alternate,
    pub backwards: bool,
    pub max_variable: Option<String>,
}

impl Default for CollationSpec {
    fn default() -> Self {
        Self {
            locale: "simple".to_string(),
            case_level: false,
            case_first: CaseFirst::Off,
            strength: 3,
            numeric_ordering: false,
            alternate: Alternate::NonIgnorable,
            backwards: false,
            max_variable: None,
        }
    }
}

impl CollationSpec {
    /// Create a collation for a locale with default settings
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            ..Default::default()
        }
    }

    /// Build from a collation document such as `{locale: "en", strength: 1}`
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            bail!("collation must be an object");
        };
        let mut spec = Self::default();
        for (key, v) in obj {
            match key.as_str() {
                "locale" => spec.locale = v.as_str().unwrap_or("simple").to_string(),
                "caseLevel" => spec.case_level = v.is_truthy(true),
                "caseFirst" => {
                    spec.case_first = match v.as_str() {
                        Some("upper") => CaseFirst::Upper,
                        Some("lower") => CaseFirst::Lower,
                        Some("off") | None => CaseFirst::Off,
                        Some(other) => bail!("invalid collation caseFirst '{}'", other),
                    }
                }
                "strength" => {
                    spec.strength = v
                        .as_i64()
                        .and_then(|s| u8::try_from(s).ok())
                        .unwrap_or(0)
                }
                "numericOrdering" => spec.numeric_ordering = v.is_truthy(true),
                "alternate" => {
                    spec.alternate = match v.as_str() {
                        Some("shifted") => Alternate::Shifted,
                        _ => Alternate::NonIgnorable,
                    }
                }
                "backwards" => spec.backwards = v.is_truthy(true),
                "maxVariable" => spec.max_variable = v.as_str().map(str::to_string),
                other => bail!("unknown collation option '{}'", other),
            }
        }
        spec.validate()?;
        Ok(spec)
    }

    /// Reject settings that are not supported
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=5).contains(&self.strength),
            "collation strength must be between 1 and 5, got {}",
            self.strength
        );
        ensure!(!self.backwards, "collation option 'backwards' is not supported");
        ensure!(
            self.max_variable.is_none(),
            "collation option 'maxVariable' is not supported"
        );
        Ok(())
    }

    /// Compare two strings under this collation
    pub fn compare_strings(&self, a: &str, b: &str) -> Ordering {
        let (ka, kb) = (self.sort_key(a), self.sort_key(b));
        let primary = compare_segments(&ka, &kb, self.numeric_ordering, true);
        if primary != Ordering::Equal || (self.strength < 3 && !self.case_level) {
            return primary;
        }
        // tertiary: case differences
        let tertiary = compare_segments(&ka, &kb, self.numeric_ordering, false);
        match self.case_first {
            CaseFirst::Upper => tertiary.reverse(),
            CaseFirst::Lower | CaseFirst::Off => tertiary,
        }
    }

    fn sort_key(&self, s: &str) -> Vec<char> {
        match self.alternate {
            Alternate::Shifted => s
                .chars()
                .filter(|c| !(c.is_whitespace() || c.is_ascii_punctuation()))
                .collect(),
            Alternate::NonIgnorable => s.chars().collect(),
        }
    }
}

/// Compare character sequences; digit runs compare numerically when enabled.
/// With `fold` set, case differences are ignored. Without it, lowercase sorts
/// before uppercase.
fn compare_segments(a: &[char], b: &[char], numeric: bool, fold: bool) -> Ordering {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if numeric && a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_i = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let start_j = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let trim = |run: &[char]| -> Vec<char> {
                let first = run.iter().position(|c| *c != '0').unwrap_or(run.len());
                run[first..].to_vec()
            };
            let (na, nb) = (trim(&a[start_i..i]), trim(&b[start_j..j]));
            let ord = na.len().cmp(&nb.len()).then_with(|| na.cmp(&nb));
            if ord != Ordering::Equal {
                return ord;
            }
            continue;
        }
        let ord = if fold {
            fold_char(a[i]).cmp(&fold_char(b[j]))
        } else {
            case_rank(a[i]).cmp(&case_rank(b[j]))
        };
        if ord != Ordering::Equal {
            return ord;
        }
        i += 1;
        j += 1;
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn case_rank(c: char) -> (char, u8) {
    (fold_char(c), u8::from(c.is_uppercase()))
}

/// Compare values, applying the collation to string pairs
pub fn compare_collated(a: &Value, b: &Value, collation: Option<&CollationSpec>) -> Ordering {
    match (a, b, collation) {
        (Value::String(x), Value::String(y), Some(spec)) => spec.compare_strings(x, y),
        _ => compare(a, b),
    }
}
