#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use rust_xlsxwriter::Workbook;

/// Attribute rows of a metadata sheet, starting at row 2.
pub const ATTRIBUTES: [&str; 12] = [
    "id",
    "title",
    "url",
    "notes",
    "author",
    "author_email",
    "maintainer",
    "maintainer_email",
    "license_id",
    "version",
    "tags",
    "license_url",
];

pub struct SheetFixture {
    pub name: String,
    pub values: BTreeMap<&'static str, [String; 4]>,
}

impl SheetFixture {
    pub fn new(name: &str, id: &str, title: &str) -> Self {
        let same = |value: &str| std::array::from_fn(|_| value.to_string());
        let mut values = BTreeMap::new();
        values.insert("id", same(id));
        values.insert(
            "title",
            [
                title.to_string(),
                format!("{title} (fr)"),
                format!("{title} (it)"),
                format!("{title} (en)"),
            ],
        );
        values.insert("url", same("https://www.bag.admin.ch/"));
        values.insert(
            "notes",
            [
                format!("Beschreibung {id}"),
                format!("Description {id}"),
                format!("Descrizione {id}"),
                format!("Description of {id}"),
            ],
        );
        values.insert(
            "author",
            [
                "Sektion Statistik".to_string(),
                "Section Statistique".to_string(),
                "Sezione Statistica".to_string(),
                "Statistics Section".to_string(),
            ],
        );
        values.insert("author_email", same("statistik@bag.admin.ch"));
        values.insert("maintainer", same("BAG"));
        values.insert("maintainer_email", same("info@bag.admin.ch"));
        values.insert("license_id", same("CC-BY"));
        values.insert("version", same("2020.1"));
        values.insert(
            "tags",
            [
                "Gesundheit, Prämien".to_string(),
                "santé, primes".to_string(),
                "salute, premi".to_string(),
                "health, premiums".to_string(),
            ],
        );
        values.insert("license_url", same("https://opendata.swiss/terms"));
        Self {
            name: name.to_string(),
            values,
        }
    }

    pub fn with(mut self, attribute: &'static str, values: [&str; 4]) -> Self {
        self.values
            .insert(attribute, values.map(|value| value.to_string()));
        self
    }
}

pub fn write_workbook(path: &Path, sheets: &[SheetFixture]) {
    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name).unwrap();
        worksheet.write_string(0, 0, "Metadaten").unwrap();
        worksheet.write_string(1, 0, "Attribut").unwrap();
        for (col, lang) in ["de", "fr", "it", "en"].iter().enumerate() {
            worksheet.write_string(1, col as u16 + 1, *lang).unwrap();
        }
        for (offset, attribute) in ATTRIBUTES.iter().enumerate() {
            let row = 2 + offset as u32;
            worksheet.write_string(row, 0, *attribute).unwrap();
            for (col, value) in sheet.values[attribute].iter().enumerate() {
                worksheet.write_string(row, col as u16 + 1, value).unwrap();
            }
        }
    }
    workbook.save(path).unwrap();
}
