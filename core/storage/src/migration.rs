use chill_journal_schemas::{AppendField, EventId};
use rusqlite::params;
use std::collections::BTreeSet;
use tracing::info;

use crate::config::AppendMode;
use crate::error::{Result, StoreError};
use crate::multivalue;
use crate::scope::{ConnectionScope, Database};

/// Migration statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub events_scanned: usize,
    pub events_converted: usize,
    pub values_moved: usize,
}

/// Check if a column exists in a table
pub(crate) fn has_column(scope: &ConnectionScope<'_>, table: &str, column: &str) -> Result<bool> {
    let query = format!("PRAGMA table_info({})", table);
    let columns = scope.query_all(&query, [], |row| row.get::<_, String>(1))?;
    Ok(columns.iter().any(|name| name == column))
}

/// Add the `photos` column to `events`.
///
/// Applied once in the life of a store; a second run fails with
/// [`StoreError::SchemaAlreadyMigrated`].
pub fn add_photos_column(scope: &ConnectionScope<'_>) -> Result<()> {
    if has_column(scope, "events", "photos")? {
        return Err(StoreError::SchemaAlreadyMigrated {
            table: "events",
            column: "photos",
        });
    }

    scope.execute("ALTER TABLE events ADD COLUMN photos TEXT", [])?;
    info!("Added photos column to events");
    Ok(())
}

/// Move delimited append-style text into `event_values`.
///
/// Every column value is split on its field separator; the first part stays
/// in `events` and the rest become value rows placed before any values the
/// event already has. Read-back text is unchanged. The file is then marked
/// for [`AppendMode::ValueTable`], so stores opened in
/// [`AppendMode::Delimited`] refuse it from here on.
pub fn migrate_delimited_to_value_table(db: &Database) -> Result<MigrationStats> {
    db.scoped_any_mode(|scope| {
        multivalue::ensure_value_table(scope)?;

        let events_scanned: i64 = scope
            .query_optional("SELECT COUNT(*) FROM events", [], |row| row.get(0))?
            .unwrap_or(0);
        let mut stats = MigrationStats {
            events_scanned: events_scanned as usize,
            ..MigrationStats::default()
        };

        info!("Converting {} events to value rows", stats.events_scanned);

        let mut converted = BTreeSet::new();
        for field in AppendField::ALL {
            let column = field.as_str();
            let rows = scope.query_all(
                &format!(
                    "SELECT event_id, {column} FROM events
                     WHERE {column} IS NOT NULL
                     ORDER BY event_id"
                ),
                [],
                |row| Ok((EventId(row.get(0)?), row.get::<_, String>(1)?)),
            )?;

            for (event_id, text) in rows {
                let (base, rest) = multivalue::split_delimited(field, &text);
                if rest.is_empty() {
                    continue;
                }

                scope.execute(
                    &format!("UPDATE events SET {column} = ?1 WHERE event_id = ?2"),
                    params![base, event_id.0],
                )?;
                multivalue::prepend_values(scope, event_id, field, &rest)?;

                stats.values_moved += rest.len();
                converted.insert(event_id);
            }
        }
        stats.events_converted = converted.len();

        scope.record_append_mode(AppendMode::ValueTable)?;

        info!(
            "Value table migration complete: {} of {} events converted, {} values moved",
            stats.events_converted, stats.events_scanned, stats.values_moved
        );
        Ok(stats)
    })
}
