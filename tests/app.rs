mod common;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use foph_harvester::app::{GatherOutcome, Harvester, METADATA_FILE_NAME, UpsertAction};
use foph_harvester::catalog::{Catalog, EntityRef, NewGroup, NewOrganization, PackageDict};
use foph_harvester::config::{BucketSettings, CatalogSettings, HarvestConfig, HttpSettings};
use foph_harvester::domain::{
    GroupText, HarvestItem, Language, OrganizationText, TermTranslation,
};
use foph_harvester::error::HarvestError;
use foph_harvester::identity::deterministic_id;
use foph_harvester::output::JsonOutput;
use foph_harvester::s3::{ObjectStore, ObjectSummary};
use foph_harvester::store::{LockRecord, ObjectState, Store};

use common::{SheetFixture, write_workbook};

const BASE_URL: &str = "http://bag-ogd.s3.amazonaws.com";

struct MockBucket {
    workbook: Option<PathBuf>,
    objects: Vec<ObjectSummary>,
    failing_prefixes: Vec<String>,
}

impl MockBucket {
    fn new(workbook: Option<PathBuf>) -> Self {
        let objects = [
            ("ch.bag/Praemien/", 0),
            ("ch.bag/Praemien/praemien_2021.csv", 2048),
            ("ch.bag/Praemien/praemien_2022.XLSX", 4096),
            ("ch.bag/Spitalstatistikdateien/kzp/2020/", 0),
            ("ch.bag/Spitalstatistikdateien/kzp/2020/kzp20.csv", 1024),
            ("ch.bag/Spitalstatistikdateien/kzp/2019/kzp19.csv", 512),
        ]
        .into_iter()
        .map(|(key, size)| ObjectSummary {
            key: key.to_string(),
            size,
        })
        .collect();
        Self {
            workbook,
            objects,
            failing_prefixes: Vec::new(),
        }
    }
}

impl ObjectStore for MockBucket {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, HarvestError> {
        if self.failing_prefixes.iter().any(|failing| failing == prefix) {
            return Err(HarvestError::RemoteList {
                prefix: prefix.to_string(),
                message: "access denied".to_string(),
            });
        }
        Ok(self
            .objects
            .iter()
            .filter(|object| object.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn object_size(&self, key: &str) -> Result<u64, HarvestError> {
        self.objects
            .iter()
            .find(|object| object.key == key)
            .map(|object| object.size)
            .ok_or_else(|| HarvestError::S3Status {
                status: 404,
                message: key.to_string(),
            })
    }

    fn download(&self, key: &str, destination: &Path) -> Result<(), HarvestError> {
        assert_eq!(key, METADATA_FILE_NAME);
        match &self.workbook {
            Some(source) => fs::copy(source, destination)
                .map(|_| ())
                .map_err(|err| HarvestError::Filesystem(err.to_string())),
            None => Err(HarvestError::S3Status {
                status: 403,
                message: "Forbidden".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct CatalogState {
    groups: Vec<EntityRef>,
    organizations: Vec<(EntityRef, NewOrganization)>,
    packages: BTreeMap<String, PackageDict>,
    collaborators: Vec<(String, String, String)>,
    translations: Vec<TermTranslation>,
    purged: Vec<String>,
}

#[derive(Default)]
struct MemoryCatalog {
    state: Mutex<CatalogState>,
    fail_translations: bool,
    fail_group_show: bool,
    /// Another import attaches a dataset to the same group and organisation
    /// just before translations fail.
    concurrent_import: bool,
}

fn not_found(entity: &str, id: &str) -> HarvestError {
    HarvestError::CatalogNotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

fn conflict(entity: &str, id: &str) -> HarvestError {
    HarvestError::CatalogConflict {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

impl Catalog for MemoryCatalog {
    fn group_show(&self, id: &str) -> Result<EntityRef, HarvestError> {
        if self.fail_group_show {
            return Err(HarvestError::CatalogHttp("connection reset".to_string()));
        }
        let state = self.state.lock().unwrap();
        let mut group = state
            .groups
            .iter()
            .find(|group| group.id == id || group.name == id)
            .cloned()
            .ok_or_else(|| not_found("group", id))?;
        group.package_count = state
            .packages
            .values()
            .filter(|package| package.groups.iter().any(|member| member.id == group.id))
            .count();
        Ok(group)
    }

    fn group_create(&self, group: &NewGroup) -> Result<EntityRef, HarvestError> {
        let mut state = self.state.lock().unwrap();
        if state.groups.iter().any(|existing| existing.name == group.name) {
            return Err(conflict("group", &group.name));
        }
        let entity = EntityRef {
            id: format!("group-{}", group.name),
            name: group.name.clone(),
            package_count: 0,
        };
        state.groups.push(entity.clone());
        Ok(entity)
    }

    fn group_purge(&self, id: &str) -> Result<(), HarvestError> {
        let mut state = self.state.lock().unwrap();
        state.groups.retain(|group| group.id != id);
        state.purged.push(id.to_string());
        Ok(())
    }

    fn organization_show(&self, id: &str) -> Result<EntityRef, HarvestError> {
        let state = self.state.lock().unwrap();
        let mut organization = state
            .organizations
            .iter()
            .map(|(entity, _)| entity)
            .find(|entity| entity.id == id || entity.name == id)
            .cloned()
            .ok_or_else(|| not_found("organization", id))?;
        organization.package_count = state
            .packages
            .values()
            .filter(|package| package.owner_org == organization.id)
            .count();
        Ok(organization)
    }

    fn organization_create(
        &self,
        organization: &NewOrganization,
    ) -> Result<EntityRef, HarvestError> {
        let mut state = self.state.lock().unwrap();
        if state
            .organizations
            .iter()
            .any(|(entity, _)| entity.name == organization.name)
        {
            return Err(conflict("organization", &organization.name));
        }
        let entity = EntityRef {
            id: format!("org-{}", organization.name),
            name: organization.name.clone(),
            package_count: 0,
        };
        state
            .organizations
            .push((entity.clone(), organization.clone()));
        Ok(entity)
    }

    fn organization_purge(&self, id: &str) -> Result<(), HarvestError> {
        let mut state = self.state.lock().unwrap();
        state.organizations.retain(|(entity, _)| entity.id != id);
        state.purged.push(id.to_string());
        Ok(())
    }

    fn package_show(&self, id_or_name: &str) -> Result<EntityRef, HarvestError> {
        let state = self.state.lock().unwrap();
        state
            .packages
            .values()
            .find(|package| package.id == id_or_name || package.name == id_or_name)
            .map(|package| EntityRef {
                id: package.id.clone(),
                name: package.name.clone(),
                package_count: 0,
            })
            .ok_or_else(|| not_found("package", id_or_name))
    }

    fn package_create(&self, package: &PackageDict) -> Result<EntityRef, HarvestError> {
        let mut state = self.state.lock().unwrap();
        if state
            .packages
            .values()
            .any(|existing| existing.id == package.id || existing.name == package.name)
        {
            return Err(conflict("package", &package.name));
        }
        state.packages.insert(package.id.clone(), package.clone());
        Ok(EntityRef {
            id: package.id.clone(),
            name: package.name.clone(),
            package_count: 0,
        })
    }

    fn package_update(&self, package: &PackageDict) -> Result<EntityRef, HarvestError> {
        let mut state = self.state.lock().unwrap();
        if !state.packages.contains_key(&package.id) {
            return Err(not_found("package", &package.id));
        }
        state.packages.insert(package.id.clone(), package.clone());
        Ok(EntityRef {
            id: package.id.clone(),
            name: package.name.clone(),
            package_count: 0,
        })
    }

    fn dataset_purge(&self, id: &str) -> Result<(), HarvestError> {
        let mut state = self.state.lock().unwrap();
        state.packages.remove(id);
        state.purged.push(id.to_string());
        Ok(())
    }

    fn package_collaborator_create(
        &self,
        package_id: &str,
        user: &str,
        capacity: &str,
    ) -> Result<(), HarvestError> {
        let mut state = self.state.lock().unwrap();
        state.collaborators.push((
            package_id.to_string(),
            user.to_string(),
            capacity.to_string(),
        ));
        Ok(())
    }

    fn term_translation_update(&self, translation: &TermTranslation) -> Result<(), HarvestError> {
        if self.fail_translations {
            let mut state = self.state.lock().unwrap();
            if self.concurrent_import && !state.packages.contains_key("concurrent-dataset") {
                if let Some(mut other) = state.packages.values().next().cloned() {
                    other.id = "concurrent-dataset".to_string();
                    other.name = "concurrent-dataset".to_string();
                    state.packages.insert(other.id.clone(), other);
                }
            }
            return Err(HarvestError::CatalogWrite(
                "term_translation_update: not authorized".to_string(),
            ));
        }
        self.state
            .lock()
            .unwrap()
            .translations
            .push(translation.clone());
        Ok(())
    }
}

fn config() -> HarvestConfig {
    HarvestConfig {
        bucket: BucketSettings {
            bucket_name: "bag-ogd".to_string(),
            access_key: "key".to_string(),
            secret_key: "secret".to_string(),
            region: "eu-central-1".to_string(),
            endpoint: None,
        },
        base_url: BASE_URL.to_string(),
        catalog: CatalogSettings {
            url: "https://ckan.example.org".to_string(),
            api_key: None,
            user: "harvest".to_string(),
            assign_owner: true,
        },
        store_dir: None,
        http: HttpSettings::default(),
        organization_text: OrganizationText::default(),
        group_text: GroupText::default(),
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    workbook: PathBuf,
    store: Store,
}

fn fixture(sheets: &[SheetFixture]) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let workbook = temp.path().join("fixture.xlsx");
    write_workbook(&workbook, sheets);
    let root = Utf8PathBuf::from_path_buf(temp.path().join("store")).unwrap();
    Fixture {
        _temp: temp,
        workbook,
        store: Store::new_with_root(root),
    }
}

fn two_datasets() -> Vec<SheetFixture> {
    vec![
        SheetFixture::new("Praemien", "praemien-id", "Krankenversicherungsprämien"),
        SheetFixture::new("KZP 2020", "kzp-id-20", "Kennzahlen der Schweizer Spitäler 2020"),
    ]
}

fn harvester(
    fixture: &Fixture,
    catalog: MemoryCatalog,
) -> Harvester<MockBucket, MemoryCatalog> {
    Harvester::new(
        config(),
        fixture.store.clone(),
        MockBucket::new(Some(fixture.workbook.clone())),
        catalog,
    )
}

fn queued_item(store: &Store, dataset_id: &str) -> HarvestItem {
    let guid = deterministic_id(Some(dataset_id));
    let object = store
        .list_objects(None)
        .unwrap()
        .into_iter()
        .find(|object| object.guid == guid)
        .unwrap();
    HarvestItem::from_payload(&object.content).unwrap()
}

#[test]
fn gather_queues_one_object_per_sheet() {
    let fixture = fixture(&two_datasets());
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();

    let report = match harvester.gather(&job, &JsonOutput) {
        GatherOutcome::Queued(report) => report,
        GatherOutcome::Failed { error, .. } => panic!("gather failed: {error}"),
    };
    assert_eq!(report.object_ids.len(), 2);
    assert!(report.skipped.is_empty());
    assert!(report.anomalies.is_empty());
    assert_eq!(fixture.store.list_objects(Some(&job.id)).unwrap().len(), 2);

    let kzp = queued_item(&fixture.store, "kzp-id-20");
    assert_eq!(kzp.resources.len(), 1);
    let resource = &kzp.resources[0];
    assert_eq!(
        resource.url,
        format!("{BASE_URL}/ch.bag/Spitalstatistikdateien/kzp/2020/kzp20.csv")
    );
    assert_eq!(resource.name, "kzp20.csv");
    assert_eq!(resource.format, "csv");
    assert_eq!(resource.size, 1024);
    assert_eq!(resource.version.as_deref(), Some("2020.1"));
    assert_eq!(kzp.license_id, "cc-by");
    assert_eq!(kzp.license_url.as_deref(), Some("https://opendata.swiss/terms"));
    assert_eq!(kzp.tags, vec!["Gesundheit", "Prämien"]);

    let premiums = queued_item(&fixture.store, "praemien-id");
    assert_eq!(premiums.resources.len(), 2);
    assert_eq!(
        premiums.resources[0].url,
        format!("{BASE_URL}/ch.bag/Praemien/praemien_2021.csv")
    );
    assert_eq!(premiums.resources[1].format, "xlsx");
    assert_eq!(premiums.resources[1].version, None);
    assert_eq!(premiums.translations, kzp.translations);
}

#[test]
fn gathered_translations_cover_fields_tags_and_static_text() {
    let fixture = fixture(&two_datasets());
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();
    assert!(!harvester.gather(&job, &JsonOutput).is_failed());

    let item = queued_item(&fixture.store, "praemien-id");
    let translations = &item.translations;
    let unique: HashSet<_> = translations.iter().collect();
    assert_eq!(unique.len(), translations.len());
    assert!(translations.contains(&TermTranslation::new(
        Language::Fr,
        "gesundheit",
        "sante"
    )));
    assert!(translations.contains(&TermTranslation::new(
        Language::En,
        "Krankenversicherungsprämien",
        "Krankenversicherungsprämien (en)"
    )));
    assert!(translations.contains(&TermTranslation::new(
        Language::It,
        "Gesundheit",
        "Salute"
    )));
    assert!(translations.contains(&TermTranslation::new(
        Language::En,
        "Bundesamt für Gesundheit BAG",
        "Federal Office of Public Health FOPH"
    )));
    assert!(translations.iter().all(|t| t.lang_code != "de"));
}

#[test]
fn tag_count_mismatch_is_reported_as_anomaly() {
    let sheet = SheetFixture::new("Praemien", "prim", "Prämien").with(
        "tags",
        ["Gesundheit, Prämien", "santé", "salute, premi", "health, premiums"],
    );
    let fixture = fixture(&[sheet]);
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();

    let report = match harvester.gather(&job, &JsonOutput) {
        GatherOutcome::Queued(report) => report,
        GatherOutcome::Failed { error, .. } => panic!("gather failed: {error}"),
    };
    assert_eq!(report.anomalies.len(), 1);
    let anomaly = &report.anomalies[0];
    assert_eq!(anomaly.sheet, "Praemien");
    assert_eq!(anomaly.lang, Language::Fr);
    assert_eq!((anomaly.base_count, anomaly.target_count), (2, 1));

    let item = queued_item(&fixture.store, "prim");
    assert!(!item.translations.iter().any(|t| t.lang_code == "fr" && t.term == "gesundheit"));
    assert!(item.translations.contains(&TermTranslation::new(
        Language::It,
        "gesundheit",
        "salute"
    )));
}

#[test]
fn gather_failure_is_returned_as_typed_outcome() {
    let fixture = fixture(&two_datasets());
    let harvester = Harvester::new(
        config(),
        fixture.store.clone(),
        MockBucket::new(None),
        MemoryCatalog::default(),
    );
    let job = harvester.create_job().unwrap();

    let outcome = harvester.gather(&job, &JsonOutput);
    assert!(outcome.object_ids().is_empty());
    assert_matches!(
        outcome,
        GatherOutcome::Failed { error: HarvestError::S3Status { status: 403, .. }, job_id } if job_id == job.id
    );
    assert!(fixture.store.list_objects(None).unwrap().is_empty());
}

#[test]
fn listing_failure_skips_only_that_dataset() {
    let fixture = fixture(&two_datasets());
    let mut bucket = MockBucket::new(Some(fixture.workbook.clone()));
    bucket
        .failing_prefixes
        .push("ch.bag/Spitalstatistikdateien/kzp/2020/".to_string());
    let harvester = Harvester::new(
        config(),
        fixture.store.clone(),
        bucket,
        MemoryCatalog::default(),
    );
    let job = harvester.create_job().unwrap();

    let report = match harvester.gather(&job, &JsonOutput) {
        GatherOutcome::Queued(report) => report,
        GatherOutcome::Failed { error, .. } => panic!("gather failed: {error}"),
    };
    assert_eq!(report.object_ids.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].dataset_id.as_deref(), Some("kzp-id-20"));
}

#[test]
fn unknown_category_is_skipped() {
    let sheets = vec![
        SheetFixture::new("Praemien", "prim", "Prämien"),
        SheetFixture::new("Andere", "xyz-20", "Andere Daten"),
    ];
    let fixture = fixture(&sheets);
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();

    let report = match harvester.gather(&job, &JsonOutput) {
        GatherOutcome::Queued(report) => report,
        GatherOutcome::Failed { error, .. } => panic!("gather failed: {error}"),
    };
    assert_eq!(report.object_ids.len(), 1);
    assert_eq!(report.skipped[0].sheet, "Andere");
    assert!(report.skipped[0].error.contains("unknown dataset category"));
}

#[test]
fn run_twice_creates_no_duplicates() {
    let fixture = fixture(&two_datasets());
    let harvester = harvester(&fixture, MemoryCatalog::default());

    let first = harvester.run(&JsonOutput).unwrap();
    assert!(first.gather_error.is_none());
    assert_eq!(first.items.len(), 2);
    for item in &first.items {
        assert_eq!(item.state, ObjectState::Imported, "{:?}", item.error);
        assert_eq!(item.import.as_ref().unwrap().action, UpsertAction::Create);
    }

    let second = harvester.run(&JsonOutput).unwrap();
    for item in &second.items {
        assert_eq!(item.state, ObjectState::Imported, "{:?}", item.error);
        assert_eq!(item.import.as_ref().unwrap().action, UpsertAction::Update);
    }
    let first_names: Vec<_> = first.items.iter().map(|i| &i.import.as_ref().unwrap().name).collect();
    let second_names: Vec<_> = second.items.iter().map(|i| &i.import.as_ref().unwrap().name).collect();
    assert_eq!(first_names, second_names);

    let state = harvester.catalog().state.lock().unwrap();
    assert_eq!(state.groups.len(), 1);
    assert_eq!(state.groups[0].name, "gesundheit");
    assert_eq!(state.organizations.len(), 1);
    assert_eq!(state.packages.len(), 2);
    assert!(state.purged.is_empty());

    let (_, organization) = &state.organizations[0];
    assert_eq!(organization.title, "Bundesamt für Gesundheit BAG");
    assert_eq!(organization.extras[0].key, "website");

    let package = &state.packages[&deterministic_id(Some("kzp-id-20"))];
    assert_eq!(package.name, "kennzahlen-der-schweizer-spitaler-2020");
    assert_eq!(package.owner_org, state.organizations[0].0.id);
    assert_eq!(package.groups[0].id, state.groups[0].id);
    let tags: Vec<_> = package.tags.iter().map(|tag| tag.name.as_str()).collect();
    assert_eq!(tags, vec!["gesundheit", "pramien"]);
    assert_eq!(package.extras[0].key, "license_url");

    assert!(
        state
            .collaborators
            .iter()
            .all(|(_, user, capacity)| user == "harvest" && capacity == "editor")
    );
}

#[test]
fn colliding_titles_get_stable_suffixed_names() {
    let sheets = vec![
        SheetFixture::new("KZP", "kzp-id-20", "Spitalstatistik"),
        SheetFixture::new("QIP", "qip-id-20", "Spitalstatistik"),
    ];
    let fixture = fixture(&sheets);
    let harvester = harvester(&fixture, MemoryCatalog::default());

    let first = harvester.run(&JsonOutput).unwrap();
    let names: Vec<String> = first
        .items
        .iter()
        .map(|item| item.import.as_ref().unwrap().name.clone())
        .collect();
    assert_eq!(names[0], "spitalstatistik");
    assert_ne!(names[1], names[0]);
    assert!(names[1].starts_with("spitalstatistik"));
    assert_eq!(names[1].len(), "spitalstatistik".len() + 5);

    let second = harvester.run(&JsonOutput).unwrap();
    let renamed: Vec<String> = second
        .items
        .iter()
        .map(|item| item.import.as_ref().unwrap().name.clone())
        .collect();
    assert_eq!(renamed, names);
}

#[test]
fn import_requires_fetched_object() {
    let fixture = fixture(&two_datasets());
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();
    let outcome = harvester.gather(&job, &JsonOutput);
    let object_id = &outcome.object_ids()[0];

    assert_matches!(
        harvester.import(object_id),
        Err(HarvestError::InvalidState { .. })
    );
    assert_eq!(
        fixture.store.load_object(object_id).unwrap().state,
        ObjectState::Gathered
    );

    harvester.fetch(object_id).unwrap();
    harvester.import(object_id).unwrap();
    assert_matches!(
        harvester.fetch(object_id),
        Err(HarvestError::InvalidState { .. })
    );
}

#[test]
fn fetch_marks_corrupt_payload_failed() {
    let fixture = fixture(&two_datasets());
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();
    let outcome = harvester.gather(&job, &JsonOutput);
    let object_id = &outcome.object_ids()[0];

    let mut object = fixture.store.load_object(object_id).unwrap();
    object.content = "{\"dataset_id\":".to_string();
    fixture.store.save_object(&object).unwrap();

    assert_matches!(harvester.fetch(object_id), Err(HarvestError::Payload(_)));
    let object = fixture.store.load_object(object_id).unwrap();
    assert_eq!(object.state, ObjectState::Failed);
    assert!(object.error.is_some());
}

#[test]
fn failed_import_rolls_back_created_entities() {
    let fixture = fixture(&two_datasets());
    let catalog = MemoryCatalog {
        fail_translations: true,
        ..MemoryCatalog::default()
    };
    let harvester = harvester(&fixture, catalog);

    let report = harvester.run(&JsonOutput).unwrap();
    for item in &report.items {
        assert_eq!(item.state, ObjectState::Failed);
        assert!(item.error.as_ref().unwrap().contains("not authorized"));
    }

    let state = harvester.catalog().state.lock().unwrap();
    assert!(state.groups.is_empty());
    assert!(state.organizations.is_empty());
    assert!(state.packages.is_empty());
    assert_eq!(
        &state.purged[..3],
        &[
            deterministic_id(Some("praemien-id")),
            "org-bundesamt-fur-gesundheit-bag".to_string(),
            "group-gesundheit".to_string(),
        ]
    );
}

#[test]
fn rollback_keeps_group_and_organization_joined_by_another_import() {
    let fixture = fixture(&two_datasets()[..1]);
    let catalog = MemoryCatalog {
        fail_translations: true,
        concurrent_import: true,
        ..MemoryCatalog::default()
    };
    let harvester = harvester(&fixture, catalog);

    let report = harvester.run(&JsonOutput).unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].state, ObjectState::Failed);

    let state = harvester.catalog().state.lock().unwrap();
    assert_eq!(state.purged, vec![deterministic_id(Some("praemien-id"))]);
    assert_eq!(state.groups.len(), 1);
    assert_eq!(state.organizations.len(), 1);
    assert_eq!(
        state.packages.keys().collect::<Vec<_>>(),
        vec!["concurrent-dataset"]
    );
}

#[test]
fn transport_error_on_lookup_is_not_treated_as_missing() {
    let fixture = fixture(&two_datasets());
    let catalog = MemoryCatalog {
        fail_group_show: true,
        ..MemoryCatalog::default()
    };
    let harvester = harvester(&fixture, catalog);
    let job = harvester.create_job().unwrap();
    let outcome = harvester.gather(&job, &JsonOutput);
    let object_id = &outcome.object_ids()[0];
    harvester.fetch(object_id).unwrap();

    assert_matches!(
        harvester.import(object_id),
        Err(HarvestError::CatalogHttp(_))
    );
    let state = harvester.catalog().state.lock().unwrap();
    assert!(state.groups.is_empty());
    assert!(state.packages.is_empty());
    drop(state);
    assert_eq!(
        fixture.store.load_object(object_id).unwrap().state,
        ObjectState::Failed
    );
}

#[test]
fn concurrent_import_of_same_dataset_is_refused() {
    let fixture = fixture(&two_datasets());
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();
    let outcome = harvester.gather(&job, &JsonOutput);
    let object_id = &outcome.object_ids()[0];
    let object = harvester.fetch(object_id).unwrap();

    let lock = fixture.store.lock_import(&object.guid).unwrap();
    assert_matches!(
        harvester.import(object_id),
        Err(HarvestError::ImportInProgress(_))
    );
    drop(lock);
    assert!(harvester.import(object_id).is_ok());
}

#[test]
fn abandoned_import_lock_does_not_block_reimport() {
    let fixture = fixture(&two_datasets());
    let harvester = harvester(&fixture, MemoryCatalog::default());
    let job = harvester.create_job().unwrap();
    let outcome = harvester.gather(&job, &JsonOutput);
    let object_id = &outcome.object_ids()[0];
    let object = harvester.fetch(object_id).unwrap();

    // A crashed import never runs the guard's drop.
    std::mem::forget(fixture.store.lock_import(&object.guid).unwrap());
    assert_matches!(
        harvester.import(object_id),
        Err(HarvestError::ImportInProgress(_))
    );

    let record = LockRecord {
        pid: std::process::id(),
        acquired_at: "2020-01-01T00:00:00Z".to_string(),
    };
    fs::write(
        fixture.store.lock_path(&object.guid).as_std_path(),
        serde_json::to_vec(&record).unwrap(),
    )
    .unwrap();
    harvester.import(object_id).unwrap();
    assert_eq!(
        fixture.store.load_object(object_id).unwrap().state,
        ObjectState::Imported
    );
    assert!(!fixture.store.lock_path(&object.guid).as_std_path().exists());
}

#[test]
fn ownership_assignment_can_be_disabled() {
    let fixture = fixture(&two_datasets());
    let mut config = config();
    config.catalog.assign_owner = false;
    let harvester = Harvester::new(
        config,
        fixture.store.clone(),
        MockBucket::new(Some(fixture.workbook.clone())),
        MemoryCatalog::default(),
    );

    harvester.run(&JsonOutput).unwrap();
    let state = harvester.catalog().state.lock().unwrap();
    assert_eq!(state.packages.len(), 2);
    assert!(state.collaborators.is_empty());
}
