use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Metadata columns of the workbook, in column order after the attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    De,
    Fr,
    It,
    En,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::De, Language::Fr, Language::It, Language::En];
    pub const BASE: Language = Language::De;

    pub fn index(self) -> usize {
        match self {
            Language::De => 0,
            Language::Fr => 1,
            Language::It => 2,
            Language::En => 3,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::De => "de",
            Language::Fr => "fr",
            Language::It => "it",
            Language::En => "en",
        }
    }

    pub fn is_base(self) -> bool {
        self == Self::BASE
    }

    pub fn translated() -> impl Iterator<Item = Language> {
        Self::ALL.into_iter().filter(|lang| !lang.is_base())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Dataset key from the workbook `id` row; also addresses the dataset's bucket folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    /// Ids listed under the category folder itself, without a year sub-folder.
    pub const UNVERSIONED: &'static str = "prim";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Three-letter category prefix selecting the bucket folder.
    pub fn category(&self) -> &str {
        &self.0[..3]
    }

    pub fn is_unversioned(&self) -> bool {
        self.0 == Self::UNVERSIONED
    }

    /// Trailing digits of the id, the two-digit year of the yearly folder.
    pub fn year_suffix(&self) -> Option<&str> {
        let rest = &self.0[3..];
        let digits = rest
            .chars()
            .rev()
            .take_while(|ch| ch.is_ascii_digit())
            .count();
        (digits > 0).then(|| &rest[rest.len() - digits..])
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = normalized.len() >= 3
            && normalized.is_ascii()
            && !normalized.contains('/')
            && !normalized.chars().any(char::is_whitespace);
        if !is_valid {
            return Err(HarvestError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for DatasetId {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetId> for String {
    fn from(value: DatasetId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub url: String,
    pub name: String,
    pub format: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermTranslation {
    pub lang_code: String,
    pub term: String,
    pub term_translation: String,
}

impl TermTranslation {
    pub fn new(lang: Language, term: impl Into<String>, translation: impl Into<String>) -> Self {
        Self {
            lang_code: lang.code().to_string(),
            term: term.into(),
            term_translation: translation.into(),
        }
    }
}

/// Denormalised dataset metadata carried between the harvest stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestItem {
    pub dataset_id: DatasetId,
    pub title: String,
    pub url: String,
    pub notes: String,
    pub author: String,
    pub author_email: String,
    pub maintainer: String,
    pub maintainer_email: String,
    pub license_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_url: Option<String>,
    pub version: String,
    pub tags: Vec<String>,
    pub resources: Vec<ResourceRef>,
    pub translations: Vec<TermTranslation>,
}

impl HarvestItem {
    pub fn to_payload(&self) -> Result<String, HarvestError> {
        serde_json::to_string(self).map_err(|err| HarvestError::Payload(err.to_string()))
    }

    pub fn from_payload(content: &str) -> Result<Self, HarvestError> {
        serde_json::from_str(content).map_err(|err| HarvestError::Payload(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationEntry {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Publishing organisation, one entry per language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationText(pub BTreeMap<Language, OrganizationEntry>);

impl OrganizationText {
    pub fn base(&self) -> Result<&OrganizationEntry, HarvestError> {
        self.0
            .get(&Language::BASE)
            .ok_or(HarvestError::MissingSetting("organization.de"))
    }

    pub fn get(&self, lang: Language) -> Option<&OrganizationEntry> {
        self.0.get(&lang)
    }
}

impl Default for OrganizationText {
    fn default() -> Self {
        let entries = [
            (
                Language::De,
                OrganizationEntry {
                    name: "Bundesamt für Gesundheit BAG".to_string(),
                    description: "Das Bundesamt für Gesundheit (BAG) ist Teil des Eidgenössischen \
                        Departements des Innern. Es ist - zusammen mit den Kantonen - verantwortlich \
                        für die Gesundheit der Schweizer Bevölkerung und für die Entwicklung der \
                        nationalen Gesundheitspolitik. Zudem vertritt das BAG als nationale Behörde \
                        die Schweiz in Gesundheitsbelangen in internationalen Organisationen und \
                        gegenüber anderen Staaten."
                        .to_string(),
                    website: Some("http://www.bar.admin.ch/".to_string()),
                },
            ),
            (
                Language::Fr,
                OrganizationEntry {
                    name: "Office fédéral de la santé publique OFSP".to_string(),
                    description: "L'Office fédéral de la santé publique (OFSP) fait partie du \
                        Département fédéral de l'intérieur. De concert avec les cantons, il assume \
                        la responsabilité des domaines touchant à la santé publique ainsi que la \
                        mise en œuvre de la politique sanitaire. Autorité à vocation nationale, il \
                        représente les intérêts sanitaires de la Suisse dans les organisations \
                        internationales et auprès d'autres Etats."
                        .to_string(),
                    website: None,
                },
            ),
            (
                Language::It,
                OrganizationEntry {
                    name: "Ufficio federale della sanità pubblica UFSP".to_string(),
                    description: "L'Ufficio federale della sanità pubblica (UFSP) è incorporato \
                        nel Dipartimento federale dell'interno. Unitamente ai Cantoni, è \
                        responsabile della salute della popolazione svizzera e dello sviluppo \
                        della politica nazionale in materia di salute. In qualità di autorità \
                        nazionale rappresenta inoltre gli interessi della Svizzera in materia di \
                        sanità in seno a organizzazioni internazionali e nei rapporti con altri \
                        Stati."
                        .to_string(),
                    website: None,
                },
            ),
            (
                Language::En,
                OrganizationEntry {
                    name: "Federal Office of Public Health FOPH".to_string(),
                    description: "The Federal Office of Public Health (FOPH) is part of the \
                        Federal Department of Home Affairs. Along with the cantons it is \
                        responsible for public health in Switzerland and for developing national \
                        health policy. As the national health authority, the FOPH also represents \
                        Switzerland's interests in the field of health in international \
                        organisations and with respect to other countries."
                        .to_string(),
                    website: None,
                },
            ),
        ];
        Self(entries.into_iter().collect())
    }
}

/// Static group names, positionally aligned across languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupText(pub BTreeMap<Language, Vec<String>>);

impl GroupText {
    pub fn base_name(&self) -> Result<&str, HarvestError> {
        self.0
            .get(&Language::BASE)
            .and_then(|names| names.first())
            .map(String::as_str)
            .ok_or(HarvestError::MissingSetting("group.de"))
    }

    pub fn names(&self, lang: Language) -> &[String] {
        self.0.get(&lang).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for GroupText {
    fn default() -> Self {
        let entries = [
            (Language::De, "Gesundheit"),
            (Language::Fr, "Santé"),
            (Language::It, "Salute"),
            (Language::En, "Health"),
        ];
        Self(
            entries
                .into_iter()
                .map(|(lang, name)| (lang, vec![name.to_string()]))
                .collect(),
        )
    }
}
