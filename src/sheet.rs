//! Reads the metadata workbook: one sheet per dataset, attribute names in
//! column 0 and one value column per language.

use std::collections::BTreeMap;
use std::path::Path;

use calamine::{Data, Range, Reader, Xlsx, open_workbook};

use crate::domain::Language;
use crate::error::HarvestError;

/// First and one-past-last data row of every sheet.
pub const FIRST_ROW: u32 = 2;
pub const END_ROW: u32 = 14;
const ATTRIBUTE_COL: u32 = 0;

/// Cell-level access to a workbook.
pub trait CellGrid {
    fn sheet_names(&self) -> Vec<String>;
    fn cell(&self, sheet: &str, row: u32, col: u32) -> Result<String, HarvestError>;
}

pub struct XlsxGrid {
    sheets: Vec<(String, Range<Data>)>,
}

impl XlsxGrid {
    pub fn open(path: &Path) -> Result<Self, HarvestError> {
        let mut workbook: Xlsx<_> = open_workbook(path).map_err(|err| {
            HarvestError::SourceRead(format!("open {}: {err}", path.display()))
        })?;
        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|err| HarvestError::SourceRead(format!("sheet {name}: {err}")))?;
            sheets.push((name, range));
        }
        Ok(Self { sheets })
    }
}

impl CellGrid for XlsxGrid {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn cell(&self, sheet: &str, row: u32, col: u32) -> Result<String, HarvestError> {
        let (_, range) = self
            .sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .ok_or_else(|| HarvestError::SourceRead(format!("no sheet named {sheet}")))?;
        range
            .get_value((row, col))
            .map(cell_string)
            .ok_or_else(|| {
                HarvestError::SourceRead(format!(
                    "sheet {sheet}: cell ({row}, {col}) out of range"
                ))
            })
    }
}

fn cell_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}

/// Attribute name -> value for one sheet in one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetColumn {
    pub sheet: String,
    pub values: BTreeMap<String, String>,
}

impl SheetColumn {
    pub fn get(&self, key: &str) -> Result<&str, HarvestError> {
        self.values.get(key).map(String::as_str).ok_or_else(|| {
            HarvestError::SourceRead(format!("sheet {}: missing attribute {key}", self.sheet))
        })
    }

    pub fn get_optional(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

/// One mapping per sheet, keyed by the attribute column, valued from the language column.
pub fn read_column(grid: &dyn CellGrid, lang: Language) -> Result<Vec<SheetColumn>, HarvestError> {
    let value_col = lang.index() as u32 + 1;
    grid.sheet_names()
        .into_iter()
        .map(|sheet| {
            let mut values = BTreeMap::new();
            for row in FIRST_ROW..END_ROW {
                let key = grid.cell(&sheet, row, ATTRIBUTE_COL)?;
                let value = grid.cell(&sheet, row, value_col)?;
                values.insert(key.trim().to_string(), value);
            }
            Ok(SheetColumn { sheet, values })
        })
        .collect()
}

pub fn read_column_from_file(
    path: &Path,
    lang: Language,
) -> Result<Vec<SheetColumn>, HarvestError> {
    let grid = XlsxGrid::open(path)?;
    read_column(&grid, lang)
}
