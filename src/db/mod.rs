//! Database module: input models, SQL repositories and the storage
//! capabilities consumed by the delivery-cost pipeline.
//!
//! - `model`: typed inputs accepted by the repository.
//! - `repo`: SQL-only functions that map rows into entities.
//! - `store`: `PackageReader` / `PackageWriter` traits and their SQLite
//!   implementation.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::*;

pub use model::{NewPackage, PackageUpdate};
pub use store::{PackageReader, PackageWriter, SqlitePackageStore};
