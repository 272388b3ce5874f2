use crate::catalog_sql::{sql_count, sql_select_batch};
use crate::datasource::DataSource;
use crate::error::Result;
use crate::table::Row;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const BATCH_SIZE: u32 = 256;

/// Streaming iterator over a table's rows.
///
/// The total row count is computed once at construction (one extra
/// `COUNT(*)` query), so the remaining length is always exact without
/// asking the cursor whether it is exhausted. Rows are then fetched in
/// fixed-size windows through one prepared LIMIT/OFFSET statement.
pub struct RowIterator<'a> {
    stmt: rusqlite::CachedStatement<'a>,
    index_by_name: Arc<HashMap<String, usize>>,
    column_count: usize,
    total: usize,
    yielded: usize,
    offset: u32,
    buffer: VecDeque<Row>,
    end_or_invalid_state: bool,
}

impl<'a> RowIterator<'a> {
    pub(crate) fn new(
        ds: &'a DataSource,
        select_sql: &str,
        column_count: usize,
        index_by_name: Arc<HashMap<String, usize>>,
    ) -> Result<Self> {
        let total: i64 = ds
            .connection()
            .query_row(&sql_count(select_sql), [], |row| row.get(0))?;
        let stmt = ds
            .connection()
            .prepare_cached(&sql_select_batch(select_sql, BATCH_SIZE))?;

        Ok(Self {
            stmt,
            index_by_name,
            column_count,
            total: total as usize,
            yielded: 0,
            offset: 0,
            buffer: VecDeque::new(),
            end_or_invalid_state: false,
        })
    }

    /// Total number of rows this iteration will yield.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Rows not yet yielded.
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.yielded)
    }

    fn fetch_batch(&mut self) -> Result<()> {
        let column_count = self.column_count;
        let index_by_name = Arc::clone(&self.index_by_name);

        let rows = self
            .stmt
            .query_map([self.offset], |row| {
                Row::from_sql_row(row, column_count, &index_by_name)
            })?
            .collect::<rusqlite::Result<Vec<Row>>>()?;

        if (rows.len() as u32) < BATCH_SIZE {
            self.end_or_invalid_state = true;
        }
        self.offset += rows.len() as u32;
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for RowIterator<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.buffer.pop_front() {
            self.yielded += 1;
            return Some(Ok(row));
        }
        if self.end_or_invalid_state {
            return None;
        }

        if let Err(err) = self.fetch_batch() {
            // Statement errors do not recover on retry with a later offset.
            self.end_or_invalid_state = true;
            return Some(Err(err));
        }

        match self.buffer.pop_front() {
            Some(row) => {
                self.yielded += 1;
                Some(Ok(row))
            }
            None => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use crate::DataSource;

    fn seeded_ds(total: usize) -> DataSource {
        let ds = DataSource::create_in_memory().expect("in-memory data source");
        ds.execute_batch("CREATE TABLE seq (id INTEGER PRIMARY KEY, n INTEGER);")
            .expect("ddl");
        for i in 0..total {
            ds.execute(&format!("INSERT INTO seq (n) VALUES ({i})"))
                .expect("insert");
        }
        ds
    }

    #[test]
    fn yields_exactly_total_rows() {
        let ds = seeded_ds(5);
        let table = ds.table("seq").expect("table");
        let mut iter = table.rows().expect("rows");

        assert_eq!(iter.total(), 5);
        let mut seen = 0;
        for row in iter.by_ref() {
            let row = row.expect("row");
            let n: i64 = row.get("n").expect("n");
            assert_eq!(n, seen);
            seen += 1;
        }
        assert_eq!(seen, 5);
        assert_eq!(iter.remaining(), 0);
        assert!(iter.next().is_none());
    }

    #[test]
    fn size_hint_counts_down() {
        let ds = seeded_ds(3);
        let table = ds.table("seq").expect("table");
        let mut iter = table.rows().expect("rows");

        assert_eq!(iter.size_hint(), (3, Some(3)));
        iter.next().expect("first").expect("row");
        assert_eq!(iter.size_hint(), (2, Some(2)));
        iter.next().expect("second").expect("row");
        iter.next().expect("third").expect("row");
        assert_eq!(iter.size_hint(), (0, Some(0)));
    }

    #[test]
    fn empty_table_yields_nothing() {
        let ds = seeded_ds(0);
        let table = ds.table("seq").expect("table");
        let mut iter = table.rows().expect("rows");
        assert_eq!(iter.total(), 0);
        assert!(iter.next().is_none());
    }

    #[test]
    fn iterates_across_batch_boundaries() {
        // More rows than one fetch window so the offset advances.
        let ds = seeded_ds(300);
        let table = ds.table("seq").expect("table");
        let count = table.rows().expect("rows").count();
        assert_eq!(count, 300);
    }
}
