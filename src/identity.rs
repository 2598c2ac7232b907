//! Stable identifiers and catalog-safe names for harvested entities.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::HarvestError;

pub const NAME_MIN_LENGTH: usize = 2;
pub const NAME_MAX_LENGTH: usize = 100;
pub const TAG_MIN_LENGTH: usize = 2;
pub const TAG_MAX_LENGTH: usize = 100;
const SUFFIX_LENGTH: usize = 5;

static REPEATED_DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("valid regex"));
static TRAILING_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*?[_-]((?:\d{2,4}[-/])?\d{2,4})$").expect("valid regex")
});

/// Name-based (v5, OID namespace) id for a seed; random (v4) when there is none.
pub fn deterministic_id(seed: Option<&str>) -> String {
    match seed.filter(|seed| !seed.is_empty()) {
        Some(seed) => Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string(),
        None => Uuid::new_v4().to_string(),
    }
}

pub fn substitute_ascii_equivalents(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.nfkd() {
        if unicode_normalization::char::is_combining_mark(ch) {
            continue;
        }
        match ch {
            'ß' => out.push_str("ss"),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            'ø' => out.push('o'),
            'Ø' => out.push('O'),
            'đ' | 'ð' => out.push('d'),
            'Đ' | 'Ð' => out.push('D'),
            'ł' => out.push('l'),
            'Ł' => out.push('L'),
            'þ' => out.push_str("th"),
            'Þ' => out.push_str("TH"),
            other => out.push(other),
        }
    }
    out
}

fn munge_to_length(mut value: String, min: usize, max: usize) -> String {
    if value.len() < min {
        value.push_str(&"_".repeat(min - value.len()));
    }
    value.truncate(max);
    value
}

/// Catalog name rules: ASCII alphanumerics, `-` and `_`, lower case, at most 100 chars.
pub fn munge_title_to_name(title: &str) -> String {
    let ascii = substitute_ascii_equivalents(title);
    let dashed = ascii.replace([' ', '.', ':', '/'], "-");
    let filtered = dashed
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect::<String>()
        .to_lowercase();
    let collapsed = REPEATED_DASH.replace_all(&filtered, "-");
    let mut name = collapsed.trim_matches('-').to_string();

    let max_length = NAME_MAX_LENGTH - SUFFIX_LENGTH;
    if name.len() > max_length {
        let year = TRAILING_YEAR
            .captures(&name)
            .and_then(|captures| captures.get(1))
            .map(|year| year.as_str().to_string());
        name = match year {
            Some(year) => format!("{}-{year}", &name[..max_length - year.len() - 1]),
            None => name[..max_length].to_string(),
        };
    }
    munge_to_length(name, NAME_MIN_LENGTH, NAME_MAX_LENGTH)
}

/// Catalog tag rules: ASCII alphanumerics and `-`, spaces become dashes.
pub fn munge_tag(tag: &str) -> String {
    let ascii = substitute_ascii_equivalents(tag).to_lowercase();
    let tag = ascii
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == ' ')
        .collect::<String>()
        .replace(' ', "-");
    munge_to_length(tag, TAG_MIN_LENGTH, TAG_MAX_LENGTH)
}

/// URL slug for a dataset title, dashes only.
pub fn slugify(title: &str) -> String {
    let name = munge_title_to_name(title).replace('_', "-");
    REPEATED_DASH.replace_all(&name, "-").into_owned()
}

fn random_suffix() -> String {
    deterministic_id(None)[..SUFFIX_LENGTH].to_string()
}

fn is_suffixed_variant(candidate: &str, slug: &str) -> bool {
    candidate.len() == slug.len() + SUFFIX_LENGTH && candidate.starts_with(slug)
}

/// Slug for `title` that is free in the catalog or already owned by `current_id`.
pub fn resolve_name<C: Catalog + ?Sized>(
    catalog: &C,
    title: &str,
    current_id: &str,
) -> Result<String, HarvestError> {
    let name = slugify(title);
    match catalog.package_show(&name) {
        Ok(existing) if existing.id == current_id => Ok(name),
        Ok(existing) => {
            tracing::debug!(name = %name, owner = %existing.id, "dataset name taken");
            match catalog.package_show(current_id) {
                Ok(own) if is_suffixed_variant(&own.name, &name) => Ok(own.name),
                Ok(_) => Ok(format!("{name}{}", random_suffix())),
                Err(err) if err.is_not_found() => Ok(format!("{name}{}", random_suffix())),
                Err(err) => Err(err),
            }
        }
        Err(err) if err.is_not_found() => Ok(name),
        Err(err) => Err(err),
    }
}
