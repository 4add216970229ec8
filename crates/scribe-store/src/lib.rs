pub mod database;
pub mod error;
pub mod leases;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod store;

pub use database::Database;
pub use error::StoreError;
pub use leases::RunLeases;
pub use sessions::SqliteSessionStore;
pub use store::SessionStore;
