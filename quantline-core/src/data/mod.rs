//! Data sources and the raw bar store.

pub mod csv_import;
pub mod provider;
pub mod raw_store;
pub mod synthetic;
pub mod yahoo;

pub use csv_import::CsvProvider;
pub use provider::{DataError, DataProvider, DataSource, FetchResult};
pub use raw_store::{RawMeta, RawStore};
pub use synthetic::SyntheticProvider;
pub use yahoo::YahooProvider;
