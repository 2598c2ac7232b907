//! The catalog the harvested datasets are written to, and a CKAN action API client for it.

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{CatalogSettings, HttpSettings};
use crate::domain::{ResourceRef, TermTranslation};
use crate::error::HarvestError;
use crate::http;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub name: String,
    /// Datasets attached to a group or organisation; zero for packages.
    #[serde(default)]
    pub package_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extra {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub title: String,
    pub description: String,
    pub extras: Vec<Extra>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDict {
    pub id: String,
    pub name: String,
    pub title: String,
    pub url: String,
    pub notes: String,
    pub author: String,
    pub author_email: String,
    pub maintainer: String,
    pub maintainer_email: String,
    pub license_id: String,
    pub version: String,
    pub owner_org: String,
    pub tags: Vec<TagRef>,
    pub groups: Vec<GroupRef>,
    pub resources: Vec<ResourceRef>,
    pub extras: Vec<Extra>,
}

/// Catalog actions used by the import stage.
///
/// `*_show` must report a missing entity as [`HarvestError::CatalogNotFound`]
/// and `*_create` a duplicate as [`HarvestError::CatalogConflict`].
pub trait Catalog: Send + Sync {
    fn group_show(&self, id: &str) -> Result<EntityRef, HarvestError>;
    fn group_create(&self, group: &NewGroup) -> Result<EntityRef, HarvestError>;
    fn group_purge(&self, id: &str) -> Result<(), HarvestError>;
    fn organization_show(&self, id: &str) -> Result<EntityRef, HarvestError>;
    fn organization_create(&self, organization: &NewOrganization)
    -> Result<EntityRef, HarvestError>;
    fn organization_purge(&self, id: &str) -> Result<(), HarvestError>;
    fn package_show(&self, id_or_name: &str) -> Result<EntityRef, HarvestError>;
    fn package_create(&self, package: &PackageDict) -> Result<EntityRef, HarvestError>;
    fn package_update(&self, package: &PackageDict) -> Result<EntityRef, HarvestError>;
    fn dataset_purge(&self, id: &str) -> Result<(), HarvestError>;
    fn package_collaborator_create(
        &self,
        package_id: &str,
        user: &str,
        capacity: &str,
    ) -> Result<(), HarvestError>;
    fn term_translation_update(&self, translation: &TermTranslation) -> Result<(), HarvestError>;
}

/// Shows the entity, creating it only when it is missing. A create that loses a
/// race against another writer falls back to showing the winner's record.
/// Returns the entity and whether this call created it.
pub fn lookup_or_create<S, C>(show: S, create: C) -> Result<(EntityRef, bool), HarvestError>
where
    S: Fn() -> Result<EntityRef, HarvestError>,
    C: FnOnce() -> Result<EntityRef, HarvestError>,
{
    match show() {
        Ok(entity) => Ok((entity, false)),
        Err(err) if err.is_not_found() => match create() {
            Ok(entity) => Ok((entity, true)),
            Err(err) if err.is_conflict() => show().map(|entity| (entity, false)),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    }
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Clone)]
pub struct CkanClient {
    client: Client,
    base_url: String,
    max_retries: usize,
}

impl CkanClient {
    pub fn new(settings: &CatalogSettings, http_settings: HttpSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &settings.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(api_key.trim())
                    .map_err(|err| HarvestError::CatalogHttp(err.to_string()))?,
            );
        }
        let client = http::build_client(http_settings, headers)
            .map_err(|err| HarvestError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.url.clone(),
            max_retries: http_settings.max_retries,
        })
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/api/3/action/{action}", self.base_url)
    }

    fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        subject: &str,
        body: &Value,
    ) -> Result<T, HarvestError> {
        let url = self.action_url(action);
        tracing::debug!(action, subject, "catalog action");
        let response = http::send_with_retries(self.max_retries, || {
            self.client.post(&url).json(body)
        })
        .map_err(|err| HarvestError::CatalogHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|err| HarvestError::CatalogHttp(err.to_string()))?;
        let envelope: ActionEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) => {
                return Err(HarvestError::CatalogStatus {
                    status,
                    message: text,
                });
            }
        };
        if !envelope.success {
            let error = envelope.error.unwrap_or(Value::Null);
            return Err(classify_error(action, subject, status, &error));
        }
        serde_json::from_value(envelope.result.unwrap_or(Value::Null))
            .map_err(|err| HarvestError::CatalogHttp(format!("{action}: {err}")))
    }

    fn call_unit(&self, action: &str, subject: &str, body: &Value) -> Result<(), HarvestError> {
        self.call::<Value>(action, subject, body).map(|_| ())
    }

    fn to_body<T: Serialize>(value: &T) -> Result<Value, HarvestError> {
        serde_json::to_value(value).map_err(|err| HarvestError::Payload(err.to_string()))
    }
}

/// Maps a CKAN error object to a harvest error kind.
pub fn classify_error(action: &str, subject: &str, status: u16, error: &Value) -> HarvestError {
    let entity = action.split('_').next().unwrap_or(action).to_string();
    let kind = error.get("__type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "Not Found Error" => HarvestError::CatalogNotFound {
            entity,
            id: subject.to_string(),
        },
        "Validation Error" if error.to_string().contains("already") => {
            HarvestError::CatalogConflict {
                entity,
                id: subject.to_string(),
            }
        }
        _ if status >= 500 => HarvestError::CatalogStatus {
            status,
            message: error.to_string(),
        },
        _ => HarvestError::CatalogWrite(format!("{action} {subject}: {error}")),
    }
}

impl Catalog for CkanClient {
    fn group_show(&self, id: &str) -> Result<EntityRef, HarvestError> {
        self.call("group_show", id, &json!({ "id": id }))
    }

    fn group_create(&self, group: &NewGroup) -> Result<EntityRef, HarvestError> {
        self.call("group_create", &group.name, &Self::to_body(group)?)
    }

    fn group_purge(&self, id: &str) -> Result<(), HarvestError> {
        self.call_unit("group_purge", id, &json!({ "id": id }))
    }

    fn organization_show(&self, id: &str) -> Result<EntityRef, HarvestError> {
        self.call("organization_show", id, &json!({ "id": id }))
    }

    fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<EntityRef, HarvestError> {
        self.call(
            "organization_create",
            &organization.name,
            &Self::to_body(organization)?,
        )
    }

    fn organization_purge(&self, id: &str) -> Result<(), HarvestError> {
        self.call_unit("organization_purge", id, &json!({ "id": id }))
    }

    fn package_show(&self, id_or_name: &str) -> Result<EntityRef, HarvestError> {
        self.call("package_show", id_or_name, &json!({ "id": id_or_name }))
    }

    fn package_create(&self, package: &PackageDict) -> Result<EntityRef, HarvestError> {
        self.call("package_create", &package.id, &Self::to_body(package)?)
    }

    fn package_update(&self, package: &PackageDict) -> Result<EntityRef, HarvestError> {
        self.call("package_update", &package.id, &Self::to_body(package)?)
    }

    fn dataset_purge(&self, id: &str) -> Result<(), HarvestError> {
        self.call_unit("dataset_purge", id, &json!({ "id": id }))
    }

    fn package_collaborator_create(
        &self,
        package_id: &str,
        user: &str,
        capacity: &str,
    ) -> Result<(), HarvestError> {
        self.call_unit(
            "package_collaborator_create",
            package_id,
            &json!({ "id": package_id, "user_id": user, "capacity": capacity }),
        )
    }

    fn term_translation_update(&self, translation: &TermTranslation) -> Result<(), HarvestError> {
        self.call_unit(
            "term_translation_update",
            &translation.term,
            &Self::to_body(translation)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn classify_not_found() {
        let error = json!({ "__type": "Not Found Error", "message": "Not found" });
        let err = classify_error("group_show", "gesundheit", 404, &error);
        assert_matches!(err, HarvestError::CatalogNotFound { entity, id } if entity == "group" && id == "gesundheit");
    }

    #[test]
    fn classify_duplicate_name_as_conflict() {
        let error = json!({
            "__type": "Validation Error",
            "name": ["Group name already exists in database"]
        });
        let err = classify_error("organization_create", "bag", 409, &error);
        assert!(err.is_conflict());
    }

    #[test]
    fn classify_other_failures() {
        let error = json!({ "__type": "Authorization Error", "message": "denied" });
        assert_matches!(
            classify_error("package_create", "x", 403, &error),
            HarvestError::CatalogWrite(_)
        );
        assert_matches!(
            classify_error("package_create", "x", 500, &Value::Null),
            HarvestError::CatalogStatus { status: 500, .. }
        );
    }

    #[test]
    fn lookup_or_create_recovers_from_conflict() {
        use std::cell::Cell;

        let shows = Cell::new(0);
        let entity = EntityRef {
            id: "1".to_string(),
            name: "gesundheit".to_string(),
            package_count: 0,
        };
        let (found, created) = lookup_or_create(
            || {
                shows.set(shows.get() + 1);
                if shows.get() == 1 {
                    Err(HarvestError::CatalogNotFound {
                        entity: "group".to_string(),
                        id: "gesundheit".to_string(),
                    })
                } else {
                    Ok(entity.clone())
                }
            },
            || {
                Err(HarvestError::CatalogConflict {
                    entity: "group".to_string(),
                    id: "gesundheit".to_string(),
                })
            },
        )
        .unwrap();
        assert_eq!(found, entity);
        assert!(!created);
        assert_eq!(shows.get(), 2);
    }

    #[test]
    fn lookup_or_create_propagates_transport_errors() {
        let result = lookup_or_create(
            || Err(HarvestError::CatalogHttp("timeout".to_string())),
            || panic!("must not create on transport errors"),
        );
        assert_matches!(result, Err(HarvestError::CatalogHttp(_)));
    }
}
