use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::catalog::{
    Catalog, EntityRef, Extra, GroupRef, NewGroup, NewOrganization, PackageDict, TagRef,
    lookup_or_create,
};
use crate::config::HarvestConfig;
use crate::domain::{DatasetId, HarvestItem, Language, TermTranslation};
use crate::error::HarvestError;
use crate::identity::{deterministic_id, munge_tag, munge_title_to_name, resolve_name};
use crate::resources::ResourceLister;
use crate::s3::ObjectStore;
use crate::sheet::{SheetColumn, XlsxGrid, read_column};
use crate::store::{HarvestJob, HarvestObject, ObjectState, Store};
use crate::translation::{TagCountMismatch, build_all_translations, split_tags};

pub const SOURCE_NAME: &str = "foph";
pub const METADATA_FILE_NAME: &str = "OGD_Metadaten_BAG.xlsx";
pub const OWNER_CAPACITY: &str = "editor";

#[derive(Debug, Clone, Serialize)]
pub struct HarvesterInfo {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub form_config_interface: &'static str,
}

pub fn info() -> HarvesterInfo {
    HarvesterInfo {
        name: SOURCE_NAME,
        title: "FOPH",
        description: "Harvests the FOPH data",
        form_config_interface: "Text",
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDataset {
    pub sheet: String,
    pub dataset_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatherReport {
    pub job_id: String,
    pub object_ids: Vec<String>,
    pub skipped: Vec<SkippedDataset>,
    pub anomalies: Vec<TagCountMismatch>,
}

/// Gather never aborts the caller: a failure to read the metadata is returned
/// as a value so it stays distinguishable from an empty harvest.
#[derive(Debug)]
pub enum GatherOutcome {
    Queued(GatherReport),
    Failed { job_id: String, error: HarvestError },
}

impl GatherOutcome {
    pub fn object_ids(&self) -> &[String] {
        match self {
            GatherOutcome::Queued(report) => &report.object_ids,
            GatherOutcome::Failed { .. } => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, GatherOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Create,
    Update,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub object_id: String,
    pub dataset_id: String,
    pub package_id: String,
    pub name: String,
    pub action: UpsertAction,
    pub owner_org: String,
    pub groups: Vec<String>,
    pub translations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub object_id: String,
    pub guid: String,
    pub state: ObjectState,
    pub import: Option<ImportResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job_id: String,
    pub gather_error: Option<String>,
    pub skipped: Vec<SkippedDataset>,
    pub anomalies: Vec<TagCountMismatch>,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Group,
    Organization,
    Dataset,
}

/// Entities created by the import in progress, purged again if it fails.
#[derive(Debug, Default)]
struct CreatedEntities(Vec<(EntityKind, String)>);

impl CreatedEntities {
    fn record(&mut self, kind: EntityKind, id: &str) {
        self.0.push((kind, id.to_string()));
    }
}

pub struct Harvester<S: ObjectStore, C: Catalog> {
    config: HarvestConfig,
    store: Store,
    objects: S,
    catalog: C,
}

impl<S: ObjectStore, C: Catalog> Harvester<S, C> {
    pub fn new(config: HarvestConfig, store: Store, objects: S, catalog: C) -> Self {
        Self {
            config,
            store,
            objects,
            catalog,
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn create_job(&self) -> Result<HarvestJob, HarvestError> {
        self.store.ensure_root()?;
        self.store.create_job(SOURCE_NAME)
    }

    pub fn gather(&self, job: &HarvestJob, sink: &dyn ProgressSink) -> GatherOutcome {
        tracing::debug!(job = %job.id, "gather stage");
        let start = Instant::now();
        match self.try_gather(job, sink) {
            Ok(report) => {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Gather; queued {} objects, skipped {}",
                        report.object_ids.len(),
                        report.skipped.len()
                    ),
                    elapsed: Some(start.elapsed()),
                });
                GatherOutcome::Queued(report)
            }
            Err(error) => {
                tracing::error!(job = %job.id, error = %error, "gather stage failed");
                GatherOutcome::Failed {
                    job_id: job.id.clone(),
                    error,
                }
            }
        }
    }

    fn try_gather(
        &self,
        job: &HarvestJob,
        sink: &dyn ProgressSink,
    ) -> Result<GatherReport, HarvestError> {
        let temp_dir = tempfile::Builder::new()
            .prefix("foph-harvest")
            .tempdir()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let metadata_path = temp_dir.path().join(METADATA_FILE_NAME);
        sink.event(ProgressEvent {
            message: format!("phase=Gather; downloading {METADATA_FILE_NAME}"),
            elapsed: None,
        });
        tracing::debug!(path = %metadata_path.display(), "saving metadata file");
        self.objects.download(METADATA_FILE_NAME, &metadata_path)?;

        let grid = XlsxGrid::open(&metadata_path)?;
        let base_cols = read_column(&grid, Language::BASE)?;
        let translations = build_all_translations(
            &grid,
            &self.config.organization_text,
            &self.config.group_text,
        )?;
        tracing::debug!(count = translations.translations.len(), "term translations");

        let mut report = GatherReport {
            job_id: job.id.clone(),
            object_ids: Vec::new(),
            skipped: Vec::new(),
            anomalies: translations.anomalies,
        };
        for col in &base_cols {
            let item = match self.build_item(col, &translations.translations) {
                Ok(item) => item,
                Err(err) => {
                    tracing::warn!(sheet = %col.sheet, error = %err, "skipping dataset");
                    report.skipped.push(SkippedDataset {
                        sheet: col.sheet.clone(),
                        dataset_id: col.get_optional("id").map(str::to_string),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            let guid = deterministic_id(Some(item.dataset_id.as_str()));
            let object = HarvestObject::new(&job.id, guid, item.to_payload()?);
            self.store.save_object(&object)?;
            tracing::debug!(dataset = %item.dataset_id, object = %object.id, "adding to the queue");
            report.object_ids.push(object.id);
        }
        Ok(report)
    }

    fn build_item(
        &self,
        col: &SheetColumn,
        translations: &[TermTranslation],
    ) -> Result<HarvestItem, HarvestError> {
        let dataset_id: DatasetId = col.get("id")?.parse()?;
        let version = col.get("version")?.to_string();

        let lister = ResourceLister::new(&self.objects, &self.config.base_url);
        let mut resources = lister.list_resources(&dataset_id)?;
        match resources.first_mut() {
            Some(first) => first.version = Some(version.clone()),
            None => tracing::warn!(dataset = %dataset_id, "no resources found"),
        }

        Ok(HarvestItem {
            title: col.get("title")?.to_string(),
            url: col.get("url")?.to_string(),
            notes: col.get("notes")?.to_string(),
            author: col.get("author")?.to_string(),
            author_email: col.get("author_email")?.to_string(),
            maintainer: col.get("maintainer")?.to_string(),
            maintainer_email: col.get("maintainer_email")?.to_string(),
            license_id: col.get("license_id")?.to_lowercase(),
            license_url: col.get_optional("license_url").map(str::to_string),
            version,
            tags: split_tags(col.get("tags")?)
                .into_iter()
                .filter(|tag| !tag.trim().is_empty())
                .map(str::to_string)
                .collect(),
            resources,
            translations: translations.to_vec(),
            dataset_id,
        })
    }

    /// Checks the payload and marks the object fetched. The content was
    /// completely gathered already, so nothing is downloaded here.
    pub fn fetch(&self, object_id: &str) -> Result<HarvestObject, HarvestError> {
        let mut object = self.store.load_object(object_id)?;
        tracing::debug!(object = %object.id, "fetch stage");
        if object.state == ObjectState::Imported {
            return Err(HarvestError::InvalidState {
                id: object.id,
                expected: ObjectState::Gathered.to_string(),
                found: object.state.to_string(),
            });
        }
        match HarvestItem::from_payload(&object.content) {
            Ok(item) => {
                object.transition(ObjectState::Fetched);
                self.store.save_object(&object)?;
                tracing::info!(dataset = %item.dataset_id, "successfully processed");
                Ok(object)
            }
            Err(err) => {
                tracing::error!(object = %object.id, error = %err, "fetch stage failed");
                object.fail(&err);
                self.store.save_object(&object)?;
                Err(err)
            }
        }
    }

    pub fn import(&self, object_id: &str) -> Result<ImportResult, HarvestError> {
        let mut object = self.store.load_object(object_id)?;
        tracing::debug!(object = %object.id, "import stage");
        if object.state != ObjectState::Fetched {
            return Err(HarvestError::InvalidState {
                id: object.id,
                expected: ObjectState::Fetched.to_string(),
                found: object.state.to_string(),
            });
        }

        let _lock = self.store.lock_import(&object.guid)?;
        let mut created = CreatedEntities::default();
        match self.import_object(&object, &mut created) {
            Ok(result) => {
                object.transition(ObjectState::Imported);
                self.store.save_object(&object)?;
                tracing::info!(
                    dataset = %result.dataset_id,
                    package = %result.package_id,
                    action = ?result.action,
                    "imported dataset"
                );
                Ok(result)
            }
            Err(err) => {
                tracing::error!(object = %object.id, guid = %object.guid, error = %err, "import stage failed");
                self.rollback(created);
                object.fail(&err);
                self.store.save_object(&object)?;
                Err(err)
            }
        }
    }

    fn import_object(
        &self,
        object: &HarvestObject,
        created: &mut CreatedEntities,
    ) -> Result<ImportResult, HarvestError> {
        let item = HarvestItem::from_payload(&object.content)?;
        let package_id = deterministic_id(Some(item.dataset_id.as_str()));
        let name = resolve_name(&self.catalog, &item.title, &package_id)?;

        let group = self.find_or_create_group(created)?;
        let organization = self.find_or_create_organization(created)?;

        let package = build_package(&item, &package_id, name, &organization, &group);
        let action = match self.catalog.package_show(&package_id) {
            Ok(_) => {
                self.catalog.package_update(&package)?;
                UpsertAction::Update
            }
            Err(err) if err.is_not_found() => {
                self.catalog.package_create(&package)?;
                created.record(EntityKind::Dataset, &package_id);
                UpsertAction::Create
            }
            Err(err) => return Err(err),
        };

        if self.config.catalog.assign_owner {
            self.catalog.package_collaborator_create(
                &package_id,
                &self.config.catalog.user,
                OWNER_CAPACITY,
            )?;
        }

        for translation in &item.translations {
            self.catalog.term_translation_update(translation)?;
        }

        Ok(ImportResult {
            object_id: object.id.clone(),
            dataset_id: item.dataset_id.to_string(),
            package_id,
            name: package.name,
            action,
            owner_org: organization.id,
            groups: vec![group.id],
            translations: item.translations.len(),
        })
    }

    fn find_or_create_group(
        &self,
        created: &mut CreatedEntities,
    ) -> Result<EntityRef, HarvestError> {
        let title = self.config.group_text.base_name()?;
        let group = NewGroup {
            name: munge_title_to_name(title),
            title: title.to_string(),
        };
        let (entity, is_new) = lookup_or_create(
            || self.catalog.group_show(&group.name),
            || self.catalog.group_create(&group),
        )?;
        if is_new {
            tracing::info!(group = %entity.id, "created the group");
            created.record(EntityKind::Group, &entity.id);
        }
        Ok(entity)
    }

    fn find_or_create_organization(
        &self,
        created: &mut CreatedEntities,
    ) -> Result<EntityRef, HarvestError> {
        let base = self.config.organization_text.base()?;
        let organization = NewOrganization {
            name: munge_title_to_name(&base.name),
            title: base.name.clone(),
            description: base.description.clone(),
            extras: base
                .website
                .iter()
                .map(|website| Extra {
                    key: "website".to_string(),
                    value: website.clone(),
                })
                .collect(),
        };
        let (entity, is_new) = lookup_or_create(
            || self.catalog.organization_show(&organization.name),
            || self.catalog.organization_create(&organization),
        )?;
        if is_new {
            tracing::info!(organization = %entity.id, "created the organization");
            created.record(EntityKind::Organization, &entity.id);
        }
        Ok(entity)
    }

    /// Purges what this import created, newest first. A group or organisation
    /// that another dataset joined in the meantime is kept. An update of an
    /// existing dataset is not reverted.
    fn rollback(&self, created: CreatedEntities) {
        for (kind, id) in created.0.into_iter().rev() {
            let result = match kind {
                EntityKind::Dataset => self.catalog.dataset_purge(&id).map(|()| true),
                EntityKind::Organization => purge_unreferenced(
                    || self.catalog.organization_show(&id),
                    || self.catalog.organization_purge(&id),
                ),
                EntityKind::Group => purge_unreferenced(
                    || self.catalog.group_show(&id),
                    || self.catalog.group_purge(&id),
                ),
            };
            match result {
                Ok(true) => tracing::info!(?kind, id = %id, "rolled back"),
                Ok(false) => tracing::info!(?kind, id = %id, "kept, still referenced by other datasets"),
                Err(err) => tracing::warn!(?kind, id = %id, error = %err, "rollback failed"),
            }
        }
    }

    /// Gathers a new job, then fetches and imports every queued object.
    /// Item failures are recorded in the report and do not stop the run.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunReport, HarvestError> {
        let job = self.create_job()?;
        let (skipped, anomalies, object_ids) = match self.gather(&job, sink) {
            GatherOutcome::Queued(report) => (report.skipped, report.anomalies, report.object_ids),
            GatherOutcome::Failed { job_id, error } => {
                return Ok(RunReport {
                    job_id,
                    gather_error: Some(error.to_string()),
                    skipped: Vec::new(),
                    anomalies: Vec::new(),
                    items: Vec::new(),
                });
            }
        };

        let mut items = Vec::new();
        for object_id in object_ids {
            sink.event(ProgressEvent {
                message: format!("phase=Import; object {object_id}"),
                elapsed: None,
            });
            let result = self
                .fetch(&object_id)
                .and_then(|_| self.import(&object_id));
            let object = self.store.load_object(&object_id)?;
            let (import, error) = match result {
                Ok(import) => (Some(import), None),
                Err(err) => (None, Some(err.to_string())),
            };
            items.push(ItemReport {
                object_id,
                guid: object.guid,
                state: object.state,
                import,
                error,
            });
        }

        Ok(RunReport {
            job_id: job.id,
            gather_error: None,
            skipped,
            anomalies,
            items,
        })
    }
}

/// Purges an entity unless datasets still point at it; `Ok(true)` when purged.
fn purge_unreferenced(
    show: impl FnOnce() -> Result<EntityRef, HarvestError>,
    purge: impl FnOnce() -> Result<(), HarvestError>,
) -> Result<bool, HarvestError> {
    if show()?.package_count > 0 {
        return Ok(false);
    }
    purge().map(|()| true)
}

fn build_package(
    item: &HarvestItem,
    package_id: &str,
    name: String,
    organization: &EntityRef,
    group: &EntityRef,
) -> PackageDict {
    let mut seen = BTreeSet::new();
    let tags = item
        .tags
        .iter()
        .map(|tag| munge_tag(tag))
        .filter(|tag| seen.insert(tag.clone()))
        .map(|name| TagRef { name })
        .collect();
    let extras = item
        .license_url
        .iter()
        .map(|url| Extra {
            key: "license_url".to_string(),
            value: url.clone(),
        })
        .collect();

    PackageDict {
        id: package_id.to_string(),
        name,
        title: item.title.clone(),
        url: item.url.clone(),
        notes: item.notes.clone(),
        author: item.author.clone(),
        author_email: item.author_email.clone(),
        maintainer: item.maintainer.clone(),
        maintainer_email: item.maintainer_email.clone(),
        license_id: item.license_id.clone(),
        version: item.version.clone(),
        owner_org: organization.id.clone(),
        tags,
        groups: vec![GroupRef {
            id: group.id.clone(),
        }],
        resources: item.resources.clone(),
        extras,
    }
}
