use std::path::Path;

use crate::domain::{DatasetId, ResourceRef};
use crate::error::HarvestError;
use crate::s3::ObjectStore;

pub const DEPARTMENT_BASE: &str = "ch.bag/";

/// Bucket folder per three-letter dataset category. Premium ids start with
/// either `pri` (`prim`) or `pra` (`praemien-...`).
pub fn category_folder(category: &str) -> Option<&'static str> {
    match category {
        "pri" | "pra" => Some("Praemien/"),
        "kzp" => Some("Spitalstatistikdateien/kzp/"),
        "qip" => Some("Spitalstatistikdateien/qip/"),
        _ => None,
    }
}

/// `ch.bag/<category folder>/[20<yy>/]` for a dataset id. The year folder is
/// only added for ids ending in digits; `prim` never gets one.
pub fn compute_prefix(id: &DatasetId) -> Result<String, HarvestError> {
    let folder = category_folder(id.category())
        .ok_or_else(|| HarvestError::UnknownCategory(id.to_string()))?;
    let mut prefix = format!("{DEPARTMENT_BASE}{folder}");
    if let Some(year) = id.year_suffix().filter(|_| !id.is_unversioned()) {
        prefix.push_str(&format!("20{year}/"));
    }
    Ok(prefix)
}

/// Lower-case file extension without the dot.
pub fn guess_format(file_name: &str) -> String {
    Path::new(&file_name.to_lowercase())
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_string()
}

pub struct ResourceLister<'a, S: ObjectStore> {
    objects: &'a S,
    base_url: &'a str,
}

impl<'a, S: ObjectStore> ResourceLister<'a, S> {
    pub fn new(objects: &'a S, base_url: &'a str) -> Self {
        Self { objects, base_url }
    }

    pub fn list_resources(&self, id: &DatasetId) -> Result<Vec<ResourceRef>, HarvestError> {
        let prefix = compute_prefix(id)?;
        let listing = self.objects.list(&prefix)?;
        let mut resources = Vec::new();
        for object in listing {
            // The folder itself shows up as a zero-byte marker key.
            let Some(name) = object.key.strip_prefix(&prefix) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let size = self.objects.object_size(&object.key)?;
            resources.push(ResourceRef {
                url: format!("{}/{}", self.base_url, object.key),
                name: name.to_string(),
                format: guess_format(&object.key),
                size,
                version: None,
            });
        }
        tracing::debug!(dataset = %id, prefix = %prefix, count = resources.len(), "listed resources");
        Ok(resources)
    }
}
