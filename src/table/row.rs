use crate::error::{GeoflowError, Result};
use crate::geometry::Geometry;
use crate::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A single result row with owned values and a shared name index.
#[derive(Clone, Debug)]
pub struct Row {
    values: Vec<Value>,
    index_by_name: Arc<HashMap<String, usize>>,
}

impl Row {
    pub(crate) fn from_sql_row(
        row: &rusqlite::Row<'_>,
        column_count: usize,
        index_by_name: &Arc<HashMap<String, usize>>,
    ) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(Value::from(row.get_ref(idx)?));
        }
        Ok(Self {
            values,
            index_by_name: Arc::clone(index_by_name),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Borrow a cell by column name.
    pub fn value(&self, column_name: &str) -> Option<&Value> {
        self.index_by_name
            .get(column_name)
            .and_then(|idx| self.values.get(*idx))
    }

    /// Borrow a cell by position.
    pub fn value_at(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Read a cell by name with a typed conversion.
    pub fn get<T>(&self, column_name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = GeoflowError>,
    {
        let value = self.value(column_name).ok_or_else(|| {
            GeoflowError::MissingColumn {
                column: column_name.to_string(),
            }
        })?;
        T::try_from(value.clone())
    }

    /// Read a cell by position with a typed conversion.
    pub fn get_at<T>(&self, idx: usize) -> Result<T>
    where
        T: TryFrom<Value, Error = GeoflowError>,
    {
        let value = self
            .value_at(idx)
            .ok_or_else(|| GeoflowError::MissingColumn {
                column: format!("column {idx}"),
            })?;
        T::try_from(value.clone())
    }

    /// Decode the named cell as a GeoPackage geometry.
    pub fn geometry(&self, column_name: &str) -> Result<Geometry> {
        let value = self.value(column_name).ok_or_else(|| {
            GeoflowError::MissingColumn {
                column: column_name.to_string(),
            }
        })?;
        geometry_from_value(value)
    }

    /// Decode the cell at the given position as a GeoPackage geometry.
    pub fn geometry_at(&self, idx: usize) -> Result<Geometry> {
        let value = self
            .value_at(idx)
            .ok_or_else(|| GeoflowError::MissingColumn {
                column: format!("column {idx}"),
            })?;
        geometry_from_value(value)
    }
}

fn geometry_from_value(value: &Value) -> Result<Geometry> {
    match value {
        Value::Blob(bytes) => Geometry::from_gpkg_blob(bytes.clone()),
        other => Err(GeoflowError::ValueTypeMismatch {
            expected: "blob",
            actual: other.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::Row;
    use crate::error::GeoflowError;
    use crate::types::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn sample_row() -> Row {
        let mut index = HashMap::new();
        index.insert("id".to_string(), 0);
        index.insert("name".to_string(), 1);
        index.insert("score".to_string(), 2);
        Row {
            values: vec![
                Value::Integer(7),
                Value::Text("alpha".to_string()),
                Value::Null,
            ],
            index_by_name: Arc::new(index),
        }
    }

    #[test]
    fn typed_access_by_name_and_index() {
        let row = sample_row();
        let id: i64 = row.get("id").expect("id");
        assert_eq!(id, 7);

        let name: String = row.get_at(1).expect("name");
        assert_eq!(name, "alpha");

        let score: Option<f64> = row.get("score").expect("nullable score");
        assert_eq!(score, None);
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let row = sample_row();
        let err = row.get::<i64>("nope").expect_err("missing");
        match err {
            GeoflowError::MissingColumn { column } => assert_eq!(column, "nope"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_blob_geometry_access_fails() {
        let row = sample_row();
        let err = row.geometry("name").expect_err("text is not geometry");
        assert!(matches!(err, GeoflowError::ValueTypeMismatch { .. }));
    }
}
