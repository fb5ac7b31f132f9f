pub mod config;
pub mod error;
pub mod events;
pub mod migration;
mod multivalue;
pub mod quotes;
pub mod scope;

pub use chill_journal_schemas::{AppendField, EventId, EventRecord, NewEvent, PhotoRef, UserId};
pub use config::{AppendMode, StoreConfig};
pub use error::{Result, StoreError};
pub use events::{EventStore, EventTable};
pub use migration::{add_photos_column, migrate_delimited_to_value_table, MigrationStats};
pub use quotes::{parse_pages, sort_page_list, QuoteLedger, QuoteTable};
pub use scope::{ConnectionScope, Database};
