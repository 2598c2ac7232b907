use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::HarvestError;
use crate::identity::deterministic_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Gathered,
    Fetched,
    Imported,
    Failed,
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectState::Gathered => write!(f, "gathered"),
            ObjectState::Fetched => write!(f, "fetched"),
            ObjectState::Imported => write!(f, "imported"),
            ObjectState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: String,
    pub source: String,
    pub created_at: String,
}

/// Work item passed between the gather, fetch and import stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestObject {
    pub id: String,
    pub guid: String,
    pub job_id: String,
    pub state: ObjectState,
    pub content: String,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl HarvestObject {
    pub fn new(job_id: &str, guid: String, content: String) -> Self {
        let now = iso_timestamp();
        Self {
            id: deterministic_id(None),
            guid,
            job_id: job_id.to_string(),
            state: ObjectState::Gathered,
            content,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn transition(&mut self, state: ObjectState) {
        self.state = state;
        self.error = None;
        self.updated_at = iso_timestamp();
    }

    pub fn fail(&mut self, error: &HarvestError) {
        self.state = ObjectState::Failed;
        self.error = Some(error.to_string());
        self.updated_at = iso_timestamp();
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, HarvestError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("foph-harvest")).ok()
            })
            .ok_or_else(|| {
                HarvestError::Filesystem("unable to resolve data directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn job_path(&self, id: &str) -> Utf8PathBuf {
        self.root.join("jobs").join(format!("{id}.json"))
    }

    pub fn object_path(&self, id: &str) -> Utf8PathBuf {
        self.root.join("objects").join(format!("{id}.json"))
    }

    pub fn lock_path(&self, guid: &str) -> Utf8PathBuf {
        self.root.join("locks").join(format!("{guid}.lock"))
    }

    pub fn ensure_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    }

    pub fn create_job(&self, source: &str) -> Result<HarvestJob, HarvestError> {
        let job = HarvestJob {
            id: deterministic_id(None),
            source: source.to_string(),
            created_at: iso_timestamp(),
        };
        Self::write_json(&self.job_path(&job.id), &job)?;
        Ok(job)
    }

    pub fn save_object(&self, object: &HarvestObject) -> Result<(), HarvestError> {
        Self::write_json(&self.object_path(&object.id), object)
    }

    pub fn load_object(&self, id: &str) -> Result<HarvestObject, HarvestError> {
        let path = self.object_path(id);
        if !path.as_std_path().exists() {
            return Err(HarvestError::ObjectNotFound(id.to_string()));
        }
        Self::read_json(&path)
    }

    /// Objects ordered by creation time, optionally restricted to one job.
    pub fn list_objects(&self, job_id: Option<&str>) -> Result<Vec<HarvestObject>, HarvestError> {
        let dir = self.root.join("objects");
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut objects = Vec::new();
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?
                .path();
            if !is_json(&path) {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(path)
                .map_err(|_| HarvestError::Filesystem("invalid object path".to_string()))?;
            let object: HarvestObject = Self::read_json(&path)?;
            if job_id.is_none_or(|job| job == object.job_id) {
                objects.push(object);
            }
        }
        objects.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(objects)
    }

    /// Holds an exclusive lock on `guid` until the returned guard is dropped.
    ///
    /// The lock file records the holder's pid and acquisition time. A lock left
    /// behind by a crashed process is reclaimed once its holder is gone or it is
    /// older than [`IMPORT_LOCK_TTL`].
    pub fn lock_import(&self, guid: &str) -> Result<ImportLock, HarvestError> {
        let path = self.lock_path(guid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        match Self::create_lock(&path, guid) {
            Err(HarvestError::ImportInProgress(_)) if Self::lock_is_stale(&path) => {
                tracing::warn!(guid, path = %path, "reclaiming stale import lock");
                match fs::remove_file(path.as_std_path()) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(HarvestError::Filesystem(err.to_string())),
                }
                Self::create_lock(&path, guid)
            }
            other => other,
        }
    }

    fn create_lock(path: &Utf8Path, guid: &str) -> Result<ImportLock, HarvestError> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_std_path())
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(HarvestError::ImportInProgress(guid.to_string()));
            }
            Err(err) => return Err(HarvestError::Filesystem(err.to_string())),
        };
        let lock = ImportLock {
            path: path.to_path_buf(),
        };
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: iso_timestamp(),
        };
        serde_json::to_writer(&mut file, &record)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(lock)
    }

    fn lock_is_stale(path: &Utf8Path) -> bool {
        let record = fs::read_to_string(path.as_std_path())
            .ok()
            .and_then(|content| serde_json::from_str::<LockRecord>(&content).ok());
        match record {
            Some(record) => {
                let expired = chrono::DateTime::parse_from_rfc3339(&record.acquired_at)
                    .map(|acquired| {
                        chrono::Utc::now().signed_duration_since(acquired) > lock_ttl()
                    })
                    .unwrap_or(true);
                expired || !process_is_alive(record.pid)
            }
            // A holder may not have written its record yet; judge by file age.
            None => fs::metadata(path.as_std_path())
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > IMPORT_LOCK_TTL),
        }
    }

    fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), HarvestError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, HarvestError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| HarvestError::Filesystem(format!("parse {path}: {err}")))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Age after which an import lock is considered abandoned.
pub const IMPORT_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

fn lock_ttl() -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(IMPORT_LOCK_TTL).unwrap_or(chrono::TimeDelta::MAX)
}

/// Contents of a lock file.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: String,
}

#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

/// Removes the lock file on drop.
#[derive(Debug)]
pub struct ImportLock {
    path: Utf8PathBuf,
}

impl Drop for ImportLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            tracing::warn!(path = %self.path, error = %err, "failed to release import lock");
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false)
}

pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
