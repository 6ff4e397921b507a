mod models;
mod schema;
mod store;
mod sync;

pub use models::{ArtistList, CatalogError, Platform, Song};
pub use store::{CatalogStore, FormatPreferences, SqliteCatalogStore};
pub use sync::{retry_with_backoff, CatalogSync, ContentionRetry};
