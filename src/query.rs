use crate::datasource::DataSource;
use crate::error::{GeoflowError, Result};
use crate::table::{SpatialTable, Table};

/// Sort direction for [`QueryBuilder::order_by`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Fluent builder assembling a SELECT statement that resolves into a
/// table wrapper.
///
/// Filter, group and order fragments are passed through verbatim; the
/// database plans and validates them. Example:
///
/// ```no_run
/// use rusqlite_geoflow::{DataSource, Order};
///
/// let ds = DataSource::open("data.gpkg")?;
/// let table = ds
///     .select(["station", "level"])
///     .from("readings")
///     .filter("level > 1.0")
///     .order_by("level", Order::Desc)
///     .limit(10)
///     .fetch()?;
/// # Ok::<(), rusqlite_geoflow::GeoflowError>(())
/// ```
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    ds: &'a DataSource,
    columns: Vec<String>,
    source: Option<String>,
    filter: Option<String>,
    group_by: Vec<String>,
    order_by: Vec<(String, Order)>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new<I, S>(ds: &'a DataSource, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ds,
            columns: columns.into_iter().map(Into::into).collect(),
            source: None,
            filter: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Select from a named table.
    pub fn from(mut self, table_name: &str) -> Self {
        self.source = Some(format!(r#""{}""#, table_name));
        self
    }

    /// Select from another wrapper's backing query.
    pub fn from_table(self, table: &Table<'_>) -> Self {
        let sql = table.select_sql();
        self.from_subquery(&sql)
    }

    pub(crate) fn from_subquery(mut self, sql: &str) -> Self {
        self.source = Some(format!("({sql})"));
        self
    }

    /// WHERE predicate, passed through verbatim.
    pub fn filter(mut self, predicate: &str) -> Self {
        self.filter = Some(predicate.to_string());
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order_by.push((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Assemble the SELECT statement.
    pub fn sql(&self) -> Result<String> {
        let source = self.source.as_ref().ok_or_else(|| {
            GeoflowError::Message("query has no FROM source".to_string())
        })?;

        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|column| quote_column(column))
                .collect::<Vec<String>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {source}");
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            let grouped = self
                .group_by
                .iter()
                .map(|column| quote_column(column))
                .collect::<Vec<String>>()
                .join(", ");
            sql.push_str(&grouped);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let ordered = self
                .order_by
                .iter()
                .map(|(column, order)| format!("{} {}", quote_column(column), order.as_sql()))
                .collect::<Vec<String>>()
                .join(", ");
            sql.push_str(&ordered);
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite needs a LIMIT clause to accept an OFFSET.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        Ok(sql)
    }

    /// Resolve into a plain table wrapper.
    pub fn fetch(self) -> Result<Table<'a>> {
        let sql = self.sql()?;
        Table::from_query(self.ds, &sql)
    }

    /// Resolve into a spatial table wrapper; the selected columns must
    /// include geometry.
    pub fn fetch_spatial(self) -> Result<SpatialTable<'a>> {
        let sql = self.sql()?;
        SpatialTable::from_query(self.ds, &sql)
    }
}

/// Quote a plain identifier; leave `*` and expressions untouched.
fn quote_column(column: &str) -> String {
    let is_expression = column == "*"
        || column.contains('(')
        || column.contains(' ')
        || column.contains('.')
        || column.contains('"');
    if is_expression {
        column.to_string()
    } else {
        format!(r#""{column}""#)
    }
}

#[cfg(test)]
mod tests {
    use super::Order;
    use crate::DataSource;
    use crate::error::GeoflowError;

    fn sample_ds() -> DataSource {
        let ds = DataSource::create_in_memory().expect("data source");
        ds.execute_batch(
            "CREATE TABLE readings (id INTEGER PRIMARY KEY, station TEXT, level DOUBLE);
             INSERT INTO readings (station, level) VALUES
               ('a', 1.0), ('a', 3.0), ('b', 2.0), ('b', 4.0), ('c', 0.5);",
        )
        .expect("seed");
        ds
    }

    #[test]
    fn assembles_clauses_in_order() {
        let ds = sample_ds();
        let sql = ds
            .select(["station", "level"])
            .from("readings")
            .filter("level > 0.75")
            .order_by("level", Order::Desc)
            .limit(3)
            .offset(1)
            .sql()
            .expect("sql");

        assert_eq!(
            sql,
            r#"SELECT "station", "level" FROM "readings" WHERE level > 0.75 ORDER BY "level" DESC LIMIT 3 OFFSET 1"#
        );
    }

    #[test]
    fn empty_columns_select_star() {
        let ds = sample_ds();
        let table = ds
            .select(Vec::<String>::new())
            .from("readings")
            .fetch()
            .expect("fetch");
        assert_eq!(table.column_names(), vec!["id", "station", "level"]);
    }

    #[test]
    fn missing_source_is_an_error() {
        let ds = sample_ds();
        let err = ds.select(["x"]).fetch().expect_err("no FROM");
        assert!(matches!(err, GeoflowError::Message(_)));
    }

    #[test]
    fn filter_and_limit_shape_the_result() {
        let ds = sample_ds();
        let table = ds
            .select(["station", "level"])
            .from("readings")
            .filter("level >= 1.0")
            .order_by("level", Order::Asc)
            .limit(2)
            .fetch()
            .expect("fetch");

        let rows = table
            .rows()
            .expect("rows")
            .collect::<crate::Result<Vec<_>>>()
            .expect("collect");
        assert_eq!(rows.len(), 2);
        let level: f64 = rows[0].get("level").expect("level");
        assert_eq!(level, 1.0);
    }

    #[test]
    fn group_by_aggregates() {
        let ds = sample_ds();
        let table = ds
            .select(["station", "COUNT(*) AS n"])
            .from("readings")
            .group_by(["station"])
            .order_by("station", Order::Asc)
            .fetch()
            .expect("fetch");

        let rows = table
            .rows()
            .expect("rows")
            .collect::<crate::Result<Vec<_>>>()
            .expect("collect");
        assert_eq!(rows.len(), 3);
        let n: i64 = rows[0].get("n").expect("count");
        assert_eq!(n, 2);
    }

    #[test]
    fn offset_without_limit_still_works() {
        let ds = sample_ds();
        let table = ds
            .select(["id"])
            .from("readings")
            .order_by("id", Order::Asc)
            .offset(3)
            .fetch()
            .expect("fetch");
        assert_eq!(table.row_count().expect("count"), 2);
    }
}
