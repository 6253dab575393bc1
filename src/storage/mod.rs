mod database;
mod file_storage;

pub use database::create_db_pool;
pub use file_storage::FileStorage;
