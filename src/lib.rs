//! Spatial data access and process pipelines built on top of rusqlite.
//!
//! ## Overview
//!
//! Two independent toolkits share this crate:
//!
//! - A data-access layer: `DataSource` wraps a SQLite connection with
//!   GeoPackage conventions, `Table` / `SpatialTable` expose query
//!   results as lazily-iterated typed tables, and `QueryBuilder` is a
//!   small fluent DSL that resolves into those wrappers.
//! - A pipeline layer: `Process` is a named unit of computation with
//!   declared inputs/outputs, and `ProcessMapper` links processes into
//!   a graph executed in dependency order, guarded by `ProcessCheck`s.
//!
//! `DataSource` is the data-access entry point and supports several
//! open modes:
//!
//! - `DataSource::create(path)` / `DataSource::create_in_memory()`:
//!   new database with the GeoPackage catalog initialized.
//! - `DataSource::open(path)`: existing file for read/write.
//! - `DataSource::open_read_only(path)`: existing file, writes rejected.
//!
//! Every connection gets the crate's spatial SQL functions registered
//! (`ST_MinX` .. `ST_MaxY`, `ST_IsEmpty`, `ST_SRID`, `ST_Transform`),
//! which is what reprojection-by-query-rewrite and extent computation
//! run on.
//!
//! ## Reading tables
//!
//! ```no_run
//! use rusqlite_geoflow::{DataSource, Order};
//!
//! let ds = DataSource::open("data.gpkg")?;
//! let table = ds
//!     .select(["station", "level"])
//!     .from("readings")
//!     .filter("level > 1.0")
//!     .order_by("level", Order::Desc)
//!     .fetch()?;
//!
//! for row in table.rows()? {
//!     let row = row?;
//!     let station: String = row.get("station")?;
//!     let level: f64 = row.get("level")?;
//!     println!("{station}: {level}");
//! }
//! # Ok::<(), rusqlite_geoflow::GeoflowError>(())
//! ```
//!
//! Spatial tables add geometry metadata, extent computation and
//! reprojection. Reprojection rewrites the backing SQL with
//! `ST_Transform` instead of transforming rows in memory, so the result
//! is as lazy as any other wrapper:
//!
//! ```no_run
//! use rusqlite_geoflow::DataSource;
//!
//! let ds = DataSource::open("data.gpkg")?;
//! let places = ds.spatial_table("places")?;
//! assert_eq!(places.srid()?, 4326);
//!
//! let mercator = places.reproject(3857)?;
//! let extent = mercator.extent()?;
//! # let _ = extent;
//! # Ok::<(), rusqlite_geoflow::GeoflowError>(())
//! ```
//!
//! ## Pipelines
//!
//! ```
//! use rusqlite_geoflow::{Executable, Process, ProcessMapper, Value, named_values};
//!
//! let double = Process::builder()
//!     .title("double")
//!     .mandatory_input("n")
//!     .output("out")
//!     .body(|values| {
//!         let n = i64::try_from(values[0].clone())?;
//!         Ok(named_values([("out", Value::Integer(n * 2))]))
//!     })
//!     .build()?;
//!
//! let mut mapper = ProcessMapper::new();
//! let first = mapper.add(double.new_instance());
//! let second = mapper.add(double.new_instance());
//! mapper.link(first.output("out"), second.input("n"))?;
//!
//! mapper.execute(&named_values([("n", Value::Integer(5))]))?;
//! assert_eq!(mapper.results().get("out"), Some(&Value::Integer(20)));
//! # Ok::<(), rusqlite_geoflow::GeoflowError>(())
//! ```
//!
//! ## Import/export
//!
//! `Table::save` and `DataSource::import` pick a driver from the file
//! extension: `.csv` / `.tsv` (geometry as WKT) and `.geojson` /
//! `.json` (FeatureCollection, SRID 4326). Anything else is a typed
//! `UnsupportedFormat` error.

mod catalog_sql;
mod conversions;
mod datasource;
mod error;
mod geometry;
mod io;
mod printer;
mod process;
mod query;
mod sql_functions;
mod table;
mod types;

pub use datasource::{DataSet, DataSource};
pub use error::{GeoflowError, Result};
pub use geometry::{Extent, Geometry};
pub use io::{ExportOptions, ImportOptions};
pub use printer::{AsciiPrinter, HtmlPrinter};
pub use process::{
    Action, CheckMoment, Executable, InputSpec, NodeHandle, OutputSpec, PortRef, Process,
    ProcessBuilder, ProcessCheck, ProcessMapper, ProcessRegistry, named_values,
};
pub use query::{Order, QueryBuilder};
pub use sql_functions::register_spatial_functions;
pub use table::{Row, RowIterator, SpatialTable, Table};
pub use types::{ColumnSpec, ColumnType, Value, ValueKind};

// Re-export types used in public signatures to keep the public API stable.
pub use wkb::reader::{Dimension, GeometryType};
