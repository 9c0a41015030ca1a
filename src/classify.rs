use geo::Area;
use log::info;

use crate::table::{GeometryTable, Record};

pub const CLASS_ID_COLUMN: &str = "class_id";
pub const CLASS_NAME_COLUMN: &str = "class_name";

/// Class assigned to a row of the geometry table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassLabel {
    Treatment,
    Background,
}

impl ClassLabel {
    pub fn code(&self) -> &'static str {
        match self {
            ClassLabel::Treatment => "0",
            ClassLabel::Background => "-1",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClassLabel::Treatment => "Treatment",
            ClassLabel::Background => "Background",
        }
    }

    pub fn is_background(&self) -> bool {
        matches!(self, ClassLabel::Background)
    }
}

/// Default class rule: polygons with an area above one unit are treatments.
///
/// Edit this rule to change what counts as a positive label for a project.
pub fn classify(record: &Record) -> ClassLabel {
    match &record.geometry {
        Some(geometry) if !geometry.0.is_empty() && geometry.unsigned_area() > 1.0 => {
            ClassLabel::Treatment
        }
        _ => ClassLabel::Background,
    }
}

/// Prepend `class_id` and `class_name` columns computed by `encoder`
pub fn encode_classes<F>(table: &GeometryTable, encoder: F) -> GeometryTable
where
    F: Fn(&Record) -> ClassLabel,
{
    let mut encoded = table.clone();
    let mut treatments = 0usize;
    for row in encoded.rows.iter_mut() {
        let label = encoder(row);
        if !label.is_background() {
            treatments += 1;
        }
        row.set(CLASS_ID_COLUMN, label.code());
        row.set(CLASS_NAME_COLUMN, label.name());
    }
    encoded.insert_column(0, CLASS_ID_COLUMN);
    encoded.insert_column(1, CLASS_NAME_COLUMN);
    info!(
        "Encoded {} rows ({} labeled, {} background)",
        encoded.len(),
        treatments,
        encoded.len() - treatments
    );
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn rect(w: f64, h: f64) -> Record {
        Record::new(Some(MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: w, y: 0.0),
            (x: w, y: h),
            (x: 0.0, y: h),
        ]])))
    }

    #[test]
    fn test_classify_treatment() {
        let label = classify(&rect(2.0, 2.0));
        assert_eq!(label, ClassLabel::Treatment);
        assert_eq!((label.code(), label.name()), ("0", "Treatment"));
    }

    #[test]
    fn test_classify_small_or_missing_is_background() {
        for record in [
            rect(1.0, 1.0),
            rect(0.5, 0.5),
            Record::new(None),
            Record::new(Some(MultiPolygon::new(vec![]))),
        ] {
            let label = classify(&record);
            assert_eq!((label.code(), label.name()), ("-1", "Background"));
        }
    }

    #[test]
    fn test_encode_classes_prepends_columns() {
        let mut table = GeometryTable::new(vec!["filename".to_string()], None);
        table.push(rect(3.0, 3.0).with_field("filename", "a.png"));
        table.push(Record::new(None).with_field("filename", "b.png"));

        let encoded = encode_classes(&table, classify);
        assert_eq!(&encoded.columns[..2], &["class_id", "class_name"]);
        assert_eq!(encoded.rows[0].get("class_id"), Some("0"));
        assert_eq!(encoded.rows[1].get("class_name"), Some("Background"));
        // the source table is untouched
        assert!(!table.has_column("class_id"));
    }
}
