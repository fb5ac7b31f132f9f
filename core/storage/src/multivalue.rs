//! Storage encodings for append-style fields.
//!
//! In [`AppendMode::Delimited`] the `events` column holds the whole
//! accumulated text. In [`AppendMode::ValueTable`] the column keeps the value
//! given at creation (ordinal 0) and every appended value becomes one row of
//! `event_values`. Both read back as the same separator-joined text.

use chill_journal_schemas::{AppendField, EventId, UserId};
use chrono::NaiveDate;
use rusqlite::params;
use tracing::debug;

use crate::config::AppendMode;
use crate::error::{Result, StoreError};
use crate::scope::ConnectionScope;

pub(crate) fn ensure_value_table(scope: &ConnectionScope<'_>) -> Result<()> {
    scope.execute(
        "CREATE TABLE IF NOT EXISTS event_values (
            event_id INTEGER NOT NULL,
            field TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (event_id, field, ordinal)
        )",
        [],
    )?;
    Ok(())
}

pub(crate) fn value_table_exists(scope: &ConnectionScope<'_>) -> Result<bool> {
    let found = scope.query_optional(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'event_values'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(found.is_some())
}

pub(crate) fn drop_value_table(scope: &ConnectionScope<'_>) -> Result<()> {
    scope.execute("DROP TABLE IF EXISTS event_values", [])?;
    Ok(())
}

/// Append `new_value` to `field` of the event on `(user_id, date)`.
///
/// Each branch is a single write statement, so two appenders never overwrite
/// each other.
pub(crate) fn append(
    scope: &ConnectionScope<'_>,
    field: AppendField,
    user_id: UserId,
    date: NaiveDate,
    new_value: &str,
) -> Result<()> {
    match scope.append_mode() {
        AppendMode::Delimited => {
            let column = field.as_str();
            let sql = format!(
                "UPDATE events SET {column} = CASE WHEN {column} IS NULL THEN ?1 \
                 ELSE {column} || ?2 || ?1 END \
                 WHERE user_id = ?3 AND date = ?4"
            );
            let changed =
                scope.execute(&sql, params![new_value, field.separator(), user_id.0, date])?;
            if changed == 0 {
                return Err(StoreError::NotFound { user_id, date });
            }
        }
        AppendMode::ValueTable => {
            let event_id = scope.events().lookup_event_id(user_id, date)?;
            insert_value(scope, event_id, field, new_value)?;
        }
    }

    debug!("Appended to {} of event {} for user {}", field, date, user_id);
    Ok(())
}

/// Store `value` as the next ordinal of `field` for `event_id`.
pub(crate) fn insert_value(
    scope: &ConnectionScope<'_>,
    event_id: EventId,
    field: AppendField,
    value: &str,
) -> Result<()> {
    scope.execute(
        "INSERT INTO event_values (event_id, field, ordinal, value)
         SELECT ?1, ?2, COALESCE(MAX(ordinal), 0) + 1, ?3
         FROM event_values
         WHERE event_id = ?1 AND field = ?2",
        params![event_id.0, field.as_str(), value],
    )?;
    Ok(())
}

/// Insert `values` as ordinals 1..=n, moving existing values after them.
pub(crate) fn prepend_values(
    scope: &ConnectionScope<'_>,
    event_id: EventId,
    field: AppendField,
    values: &[String],
) -> Result<()> {
    let shift = values.len() as i64;

    // Negate first so the primary key stays unique while ordinals move.
    scope.execute(
        "UPDATE event_values SET ordinal = -(ordinal + ?3)
         WHERE event_id = ?1 AND field = ?2",
        params![event_id.0, field.as_str(), shift],
    )?;
    scope.execute(
        "UPDATE event_values SET ordinal = -ordinal
         WHERE event_id = ?1 AND field = ?2 AND ordinal < 0",
        params![event_id.0, field.as_str()],
    )?;

    for (index, value) in values.iter().enumerate() {
        scope.execute(
            "INSERT INTO event_values (event_id, field, ordinal, value) VALUES (?1, ?2, ?3, ?4)",
            params![event_id.0, field.as_str(), index as i64 + 1, value],
        )?;
    }
    Ok(())
}

/// Appended values of `field`, in append order.
pub(crate) fn appended_values(
    scope: &ConnectionScope<'_>,
    event_id: EventId,
    field: AppendField,
) -> Result<Vec<String>> {
    scope.query_all(
        "SELECT value FROM event_values
         WHERE event_id = ?1 AND field = ?2
         ORDER BY ordinal",
        params![event_id.0, field.as_str()],
        |row| row.get(0),
    )
}

/// Full text of `field` given the value stored in the `events` column.
pub(crate) fn read_field(
    scope: &ConnectionScope<'_>,
    event_id: EventId,
    field: AppendField,
    base: Option<String>,
) -> Result<String> {
    if scope.append_mode() == AppendMode::Delimited {
        return Ok(base.unwrap_or_default());
    }

    let appended = appended_values(scope, event_id, field)?;
    let text = base
        .into_iter()
        .chain(appended)
        .reduce(|text, value| field.join(&text, &value))
        .unwrap_or_default();
    Ok(text)
}

/// Remove value rows of the events on `(user_id, date)`, whatever the
/// configured mode.
pub(crate) fn delete_values(
    scope: &ConnectionScope<'_>,
    user_id: UserId,
    date: NaiveDate,
) -> Result<usize> {
    if !value_table_exists(scope)? {
        return Ok(0);
    }

    scope.execute(
        "DELETE FROM event_values WHERE event_id IN (
            SELECT event_id FROM events WHERE user_id = ?1 AND date = ?2
        )",
        params![user_id.0, date],
    )
}

/// Split delimited text into the base value and the appended values.
pub(crate) fn split_delimited(field: AppendField, text: &str) -> (String, Vec<String>) {
    let mut parts = text.split(field.separator()).map(str::to_string);
    let base = parts.next().unwrap_or_default();
    (base, parts.collect())
}
