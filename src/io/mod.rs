mod csv;
mod geojson;

use crate::datasource::{DataSet, DataSource};
use crate::error::{GeoflowError, Result};
use crate::table::Table;
use std::path::Path;

/// Options forwarded to the export drivers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExportOptions {
    /// Replace an existing file instead of failing.
    pub overwrite: bool,
}

/// Options forwarded to the import drivers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImportOptions {
    /// Replace an existing target table instead of failing.
    pub overwrite: bool,
}

/// File formats with an import/export driver, selected by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FileFormat {
    Csv,
    Tsv,
    GeoJson,
}

impl FileFormat {
    pub(crate) fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "geojson" | "json" => Ok(Self::GeoJson),
            _ => Err(GeoflowError::UnsupportedFormat { extension }),
        }
    }
}

pub(crate) fn export_table(
    table: &Table<'_>,
    geometry_columns: &[String],
    path: &Path,
    options: ExportOptions,
) -> Result<()> {
    let format = FileFormat::from_path(path)?;

    if path.exists() {
        if !options.overwrite {
            return Err(GeoflowError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )));
        }
        std::fs::remove_file(path)?;
    }

    tracing::debug!(path = %path.display(), ?format, "exporting table");
    match format {
        FileFormat::Csv => csv::export(table, geometry_columns, path, b','),
        FileFormat::Tsv => csv::export(table, geometry_columns, path, b'\t'),
        FileFormat::GeoJson => geojson::export(table, geometry_columns, path),
    }
}

pub(crate) fn import_file<'a>(
    ds: &'a DataSource,
    path: &Path,
    table_name: &str,
    options: ImportOptions,
) -> Result<DataSet<'a>> {
    let format = FileFormat::from_path(path)?;

    if ds.has_table(table_name)? {
        if !options.overwrite {
            return Err(GeoflowError::TableAlreadyExists {
                table_name: table_name.to_string(),
            });
        }
        ds.drop_table(table_name)?;
    }

    tracing::debug!(path = %path.display(), ?format, table_name, "importing file");
    match format {
        FileFormat::Csv => csv::import(ds, path, table_name, b',')?,
        FileFormat::Tsv => csv::import(ds, path, table_name, b'\t')?,
        FileFormat::GeoJson => geojson::import(ds, path, table_name)?,
    }

    ds.dataset(table_name)
}
