pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod query;
pub mod retry;
pub mod table_io;
pub mod warehouse;

pub use config::{Config, WarehouseConfig};
pub use error::{Error, Result, WarehouseError, WarehouseErrorKind};
pub use loader::{SqlFile, SqlLoader};
pub use query::{
    execute_sql_file, execute_sql_folder, extract_whole_table, extract_whole_table_with,
    fill_template, load_variables, Variables,
};
pub use table_io::{
    ensure_directory, format_version, list_files_with_extension, load_table, save_plot,
    save_table, Figure, LoadOptions, PlotFormat, SaveOptions, SheetSelector,
};
pub use warehouse::{
    BackendMode, BigQueryBackend, IfExists, MockBackend, QueryParameter, WarehouseBackend,
    WarehouseClient,
};
