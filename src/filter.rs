use log::info;
use std::path::Path;

use crate::error::Result;
use crate::io::load_shapefile;
use crate::table::GeometryTable;

pub const SUBREGION_COLUMN: &str = "Subregion";

// Subregion names whose NDVI images are stored under a different id
const SUBREGION_ALIASES: &[(&str, &str)] = &[("Humboldt", "Humboldt4")];

/// Keep only rows whose `column` equals `code`
pub fn filter_by_treatment(table: &GeometryTable, column: &str, code: &str) -> Result<GeometryTable> {
    table.require_column(column)?;
    let mut filtered = table.clone();
    filtered.retain(|row| row.get(column) == Some(code));
    Ok(filtered)
}

/// Rename subregions to the id of their NDVI image; other values are untouched
pub fn relabel_subregions(table: &mut GeometryTable) {
    for row in table.rows.iter_mut() {
        let alias = row.get(SUBREGION_COLUMN).and_then(|value| {
            SUBREGION_ALIASES
                .iter()
                .find(|(from, _)| *from == value)
                .map(|(_, to)| *to)
        });
        if let Some(alias) = alias {
            row.set(SUBREGION_COLUMN, alias);
        }
    }
}

/// Load the shapefile, keep one treatment type and relabel subregions
pub fn load_and_filter(path: &Path, treatment_column: &str, treatment_code: &str) -> Result<GeometryTable> {
    let table = load_shapefile(path)?;
    let mut filtered = filter_by_treatment(&table, treatment_column, treatment_code)?;
    relabel_subregions(&mut filtered);
    info!(
        "Kept {} of {} rows where {} == {}",
        filtered.len(),
        table.len(),
        treatment_column,
        treatment_code
    );
    Ok(filtered)
}
