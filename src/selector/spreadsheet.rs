//! Spreadsheet image lists
//!
//! Every sheet is read; the first row of a sheet is its header. Recognised
//! columns are `image_id`, `image_name`, `image_tag` and `image_size`; the
//! name and tag columns are required.

use crate::error::{MigratorError, Result};
use crate::image::ImageRef;
use calamine::{Reader, open_workbook_auto};
use std::path::Path;

const COL_ID: &str = "image_id";
const COL_NAME: &str = "image_name";
const COL_TAG: &str = "image_tag";
const COL_SIZE: &str = "image_size";

/// Read all sheets of a workbook into images
pub fn read_spreadsheet(path: &Path) -> Result<Vec<ImageRef>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        MigratorError::DataFormat(format!("cannot open {}: {}", path.display(), e))
    })?;

    let mut images = Vec::new();
    for (sheet, range) in workbook.worksheets() {
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
            .collect();
        let parsed = rows_to_images(&rows)
            .map_err(|e| MigratorError::DataFormat(format!("sheet {}: {}", sheet, e)))?;
        images.extend(parsed);
    }
    Ok(images)
}

/// Turn header-keyed rows into images. Blank rows are skipped.
pub fn rows_to_images(rows: &[Vec<String>]) -> Result<Vec<ImageRef>> {
    let Some((header, body)) = rows.split_first() else {
        return Ok(Vec::new());
    };

    let column = |name: &str| header.iter().position(|h| h == name);
    let name_col = column(COL_NAME)
        .ok_or_else(|| MigratorError::DataFormat(format!("missing {} column", COL_NAME)))?;
    let tag_col = column(COL_TAG)
        .ok_or_else(|| MigratorError::DataFormat(format!("missing {} column", COL_TAG)))?;
    let id_col = column(COL_ID);
    let size_col = column(COL_SIZE);

    let mut images = Vec::with_capacity(body.len());
    for (index, row) in body.iter().enumerate() {
        // header is row 1
        let row_no = index + 2;
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        let cell = |col: usize| row.get(col).map(String::as_str).unwrap_or("");
        let name = cell(name_col);
        let tag = cell(tag_col);
        if name.is_empty() || tag.is_empty() {
            return Err(MigratorError::DataFormat(format!(
                "row {}: image_name and image_tag must not be empty",
                row_no
            )));
        }

        let mut image = ImageRef::new(name, tag);
        if let Some(raw) = id_col.map(cell).filter(|raw| !raw.is_empty()) {
            let id = parse_integer(raw).ok_or_else(|| {
                MigratorError::DataFormat(format!("row {}: invalid image_id {:?}", row_no, raw))
            })?;
            image = image.with_id(id);
        }
        if let Some(raw) = size_col.map(cell).filter(|raw| !raw.is_empty()) {
            let size = parse_integer(raw).and_then(|v| u64::try_from(v).ok()).ok_or_else(|| {
                MigratorError::DataFormat(format!("row {}: invalid image_size {:?}", row_no, raw))
            })?;
            image = image.with_size(size);
        }
        images.push(image);
    }
    Ok(images)
}

/// Integers may arrive as floats from numeric spreadsheet cells
fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
}
