use std::collections::HashSet;

use serde::Serialize;

use crate::domain::{GroupText, Language, OrganizationText, TermTranslation};
use crate::error::HarvestError;
use crate::identity::munge_tag;
use crate::sheet::{CellGrid, read_column};

/// Dataset fields translated term by term.
pub const TRANSLATED_FIELDS: [&str; 5] = ["title", "notes", "author", "maintainer", "license_id"];
pub const TAG_SEPARATOR: &str = ", ";

/// A sheet whose tag lists differ in length between the base and a target language.
/// Its tag translations are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCountMismatch {
    pub sheet: String,
    pub lang: Language,
    pub base_count: usize,
    pub target_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationSet {
    pub translations: Vec<TermTranslation>,
    pub anomalies: Vec<TagCountMismatch>,
}

/// Tags of a cell; blank entries (an empty cell, a trailing separator) are dropped.
pub fn split_tags(value: &str) -> Vec<&str> {
    value
        .split(TAG_SEPARATOR)
        .filter(|tag| !tag.trim().is_empty())
        .collect()
}

/// Term translations from the base language into `lang`: dataset fields and
/// tags of every sheet, followed by the static organisation and group texts.
pub fn build_translations(
    grid: &dyn CellGrid,
    lang: Language,
    organization: &OrganizationText,
    groups: &GroupText,
) -> Result<TranslationSet, HarvestError> {
    let base_cols = read_column(grid, Language::BASE)?;
    let target_cols = read_column(grid, lang)?;

    let mut set = TranslationSet::default();
    for (base, target) in base_cols.iter().zip(&target_cols) {
        for field in TRANSLATED_FIELDS {
            set.translations
                .push(TermTranslation::new(lang, base.get(field)?, target.get(field)?));
        }

        let base_tags = split_tags(base.get("tags")?);
        let target_tags = split_tags(target.get("tags")?);
        if base_tags.len() == target_tags.len() {
            for (term, translation) in base_tags.iter().zip(&target_tags) {
                set.translations
                    .push(TermTranslation::new(lang, munge_tag(term), munge_tag(translation)));
            }
        } else {
            tracing::warn!(
                sheet = %base.sheet,
                lang = %lang,
                base_count = base_tags.len(),
                target_count = target_tags.len(),
                "tag counts differ, skipping tag translations"
            );
            set.anomalies.push(TagCountMismatch {
                sheet: base.sheet.clone(),
                lang,
                base_count: base_tags.len(),
                target_count: target_tags.len(),
            });
        }
    }

    set.translations
        .extend(static_translations(organization, groups)?);
    Ok(set)
}

/// Organisation name/description and group names for every non-base language.
pub fn static_translations(
    organization: &OrganizationText,
    groups: &GroupText,
) -> Result<Vec<TermTranslation>, HarvestError> {
    let base_org = organization.base()?;
    let base_groups = groups.names(Language::BASE);
    let mut translations = Vec::new();

    for lang in Language::translated() {
        if let Some(org) = organization.get(lang) {
            translations.push(TermTranslation::new(lang, &base_org.name, &org.name));
            translations.push(TermTranslation::new(
                lang,
                &base_org.description,
                &org.description,
            ));
        }
    }
    for lang in Language::translated() {
        for (base, name) in base_groups.iter().zip(groups.names(lang)) {
            translations.push(TermTranslation::new(lang, base, name));
        }
    }
    Ok(translations)
}

/// Translations for all non-base languages, concatenated in language order with
/// repeated triples dropped.
pub fn build_all_translations(
    grid: &dyn CellGrid,
    organization: &OrganizationText,
    groups: &GroupText,
) -> Result<TranslationSet, HarvestError> {
    let mut combined = TranslationSet::default();
    let mut seen = HashSet::new();
    for lang in Language::translated() {
        let set = build_translations(grid, lang, organization, groups)?;
        for translation in set.translations {
            if seen.insert(translation.clone()) {
                combined.translations.push(translation);
            }
        }
        combined.anomalies.extend(set.anomalies);
    }
    Ok(combined)
}
