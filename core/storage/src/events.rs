use chill_journal_schemas::{AppendField, EventId, EventRecord, NewEvent, PhotoRef, UserId};
use chrono::NaiveDate;
use rusqlite::params;
use tracing::{debug, info};

use crate::config::AppendMode;
use crate::error::{Result, StoreError};
use crate::migration;
use crate::multivalue;
use crate::scope::{ConnectionScope, Database};

const PHOTO_SEPARATOR: &str = ", ";

/// Operations on the `events` table inside a caller-owned transaction.
///
/// Obtained from [`ConnectionScope::events`]; use it to batch several
/// operations so they commit or roll back together.
pub struct EventTable<'a> {
    scope: &'a ConnectionScope<'a>,
}

impl<'a> EventTable<'a> {
    pub fn new(scope: &'a ConnectionScope<'a>) -> Self {
        Self { scope }
    }

    /// Create the events table (and the value table when appends go there)
    /// and record the append mode the file is laid out for.
    pub fn ensure_table(&self) -> Result<()> {
        // AUTOINCREMENT keeps a deleted event's id from being handed out again.
        self.scope.execute(
            "CREATE TABLE IF NOT EXISTS events (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INT,
                number INT,
                date DATE,
                places TEXT,
                people TEXT,
                state TEXT,
                memes TEXT
            )",
            [],
        )?;

        self.scope.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_user_date ON events(user_id, date)",
            [],
        )?;

        if self.scope.append_mode() == AppendMode::ValueTable {
            multivalue::ensure_value_table(self.scope)?;
        }
        self.scope.record_append_mode(self.scope.append_mode())?;

        debug!("Events schema initialized");
        Ok(())
    }

    /// One-time migration adding the `photos` column.
    pub fn add_photos_column(&self) -> Result<()> {
        migration::add_photos_column(self.scope)
    }

    pub fn drop_table(&self) -> Result<()> {
        self.scope.execute("DROP TABLE events", [])?;
        multivalue::drop_value_table(self.scope)?;

        info!("Dropped events table");
        Ok(())
    }

    /// Sequence number the user's next event gets.
    pub fn next_sequence_number(&self, user_id: UserId) -> Result<i64> {
        let max: Option<i64> = self
            .scope
            .query_optional(
                "SELECT MAX(number) FROM events WHERE user_id = ?1",
                params![user_id.0],
                |row| row.get(0),
            )?
            .flatten();

        Ok(max.map_or(1, |number| number + 1))
    }

    pub fn insert(&self, event: &NewEvent) -> Result<EventId> {
        self.scope.execute(
            "INSERT INTO events (user_id, number, date, places, people, state, memes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.user_id.0,
                event.number,
                event.date,
                event.places,
                event.people,
                event.state,
                event.memes,
            ],
        )?;

        let event_id = EventId(self.scope.last_insert_rowid());
        debug!(
            "Inserted event #{} ({}) for user {} as {}",
            event.number, event.date, event.user_id, event_id
        );
        Ok(event_id)
    }

    /// Number and insert the user's next event in one go.
    pub fn insert_next(
        &self,
        user_id: UserId,
        date: NaiveDate,
        places: &str,
        people: &str,
        state: &str,
        memes: &str,
    ) -> Result<EventRecord> {
        let event = NewEvent {
            user_id,
            number: self.next_sequence_number(user_id)?,
            date,
            places: places.to_string(),
            people: people.to_string(),
            state: state.to_string(),
            memes: memes.to_string(),
        };

        self.insert(&event)?;
        Ok(event.to_record())
    }

    pub fn lookup_event_id(&self, user_id: UserId, date: NaiveDate) -> Result<EventId> {
        self.scope
            .query_optional(
                "SELECT event_id FROM events WHERE user_id = ?1 AND date = ?2",
                params![user_id.0, date],
                |row| row.get(0).map(EventId),
            )?
            .ok_or(StoreError::NotFound { user_id, date })
    }

    pub fn list_dates(&self, user_id: UserId) -> Result<Vec<NaiveDate>> {
        self.scope.query_all(
            "SELECT date FROM events WHERE user_id = ?1 ORDER BY date",
            params![user_id.0],
            |row| row.get(0),
        )
    }

    pub fn list_dates_by_state(&self, user_id: UserId, state: &str) -> Result<Vec<NaiveDate>> {
        self.scope.query_all(
            "SELECT date FROM events WHERE user_id = ?1 AND state = ?2 ORDER BY date",
            params![user_id.0, state],
            |row| row.get(0),
        )
    }

    pub fn get_by_date(&self, user_id: UserId, date: NaiveDate) -> Result<Option<EventRecord>> {
        let row = self.scope.query_optional(
            "SELECT event_id, number, date, state, people, places, memes
             FROM events WHERE user_id = ?1 AND date = ?2",
            params![user_id.0, date],
            |row| {
                Ok(StoredEvent {
                    event_id: EventId(row.get(0)?),
                    number: row.get(1)?,
                    date: row.get(2)?,
                    state: row.get(3)?,
                    people: row.get(4)?,
                    places: row.get(5)?,
                    memes: row.get(6)?,
                })
            },
        )?;

        let Some(stored) = row else {
            return Ok(None);
        };

        let event_id = stored.event_id;
        Ok(Some(EventRecord {
            number: stored.number,
            date: stored.date,
            state: stored.state.unwrap_or_default(),
            people: multivalue::read_field(self.scope, event_id, AppendField::People, stored.people)?,
            places: multivalue::read_field(self.scope, event_id, AppendField::Places, stored.places)?,
            memes: multivalue::read_field(self.scope, event_id, AppendField::Memes, stored.memes)?,
        }))
    }

    /// Append `new_value` to one of the accumulating text fields.
    pub fn append_text(
        &self,
        field: AppendField,
        user_id: UserId,
        date: NaiveDate,
        new_value: &str,
    ) -> Result<()> {
        multivalue::append(self.scope, field, user_id, date, new_value)
    }

    /// Delete the event on `(user_id, date)`. Returns the number of events
    /// removed, zero when none matched.
    pub fn delete(&self, user_id: UserId, date: NaiveDate) -> Result<usize> {
        multivalue::delete_values(self.scope, user_id, date)?;
        let deleted = self.scope.execute(
            "DELETE FROM events WHERE user_id = ?1 AND date = ?2",
            params![user_id.0, date],
        )?;

        debug!("Deleted {} event(s) on {} for user {}", deleted, date, user_id);
        Ok(deleted)
    }

    pub fn add_photo(&self, user_id: UserId, date: NaiveDate, photo: &PhotoRef) -> Result<()> {
        let changed = self.scope.execute(
            "UPDATE events SET photos = CASE
                WHEN photos IS NULL OR photos = '' THEN ?1
                ELSE photos || ?2 || ?1
             END
             WHERE user_id = ?3 AND date = ?4",
            params![photo.0, PHOTO_SEPARATOR, user_id.0, date],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { user_id, date });
        }

        debug!("Attached photo {} to event {} for user {}", photo, date, user_id);
        Ok(())
    }

    /// Replace whatever photos the event had with a single reference.
    pub fn set_photos(&self, user_id: UserId, date: NaiveDate, photo: &PhotoRef) -> Result<()> {
        let changed = self.scope.execute(
            "UPDATE events SET photos = ?1 WHERE user_id = ?2 AND date = ?3",
            params![photo.0, user_id.0, date],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { user_id, date });
        }
        Ok(())
    }

    pub fn get_photos(&self, user_id: UserId, date: NaiveDate) -> Result<Option<Vec<PhotoRef>>> {
        let photos: Option<String> = self
            .scope
            .query_optional(
                "SELECT photos FROM events WHERE user_id = ?1 AND date = ?2",
                params![user_id.0, date],
                |row| row.get(0),
            )?
            .flatten();

        Ok(photos.filter(|text| !text.is_empty()).map(|text| {
            text.split(PHOTO_SEPARATOR)
                .map(|photo| PhotoRef(photo.to_string()))
                .collect()
        }))
    }
}

struct StoredEvent {
    event_id: EventId,
    number: i64,
    date: NaiveDate,
    state: Option<String>,
    people: Option<String>,
    places: Option<String>,
    memes: Option<String>,
}

/// Event store that runs every call in its own transaction.
#[derive(Debug, Clone)]
pub struct EventStore {
    db: Database,
}

impl EventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn ensure_events_table(&self) -> Result<()> {
        self.db.scoped(|scope| scope.events().ensure_table())
    }

    pub fn add_photos_column(&self) -> Result<()> {
        self.db.scoped(|scope| scope.events().add_photos_column())
    }

    pub fn drop_events_table(&self) -> Result<()> {
        self.db.scoped(|scope| scope.events().drop_table())
    }

    pub fn next_sequence_number(&self, user_id: UserId) -> Result<i64> {
        self.db.scoped(|scope| scope.events().next_sequence_number(user_id))
    }

    pub fn insert_event(&self, event: &NewEvent) -> Result<EventId> {
        self.db.scoped(|scope| scope.events().insert(event))
    }

    pub fn insert_next_event(
        &self,
        user_id: UserId,
        date: NaiveDate,
        places: &str,
        people: &str,
        state: &str,
        memes: &str,
    ) -> Result<EventRecord> {
        self.db.scoped(|scope| {
            scope
                .events()
                .insert_next(user_id, date, places, people, state, memes)
        })
    }

    pub fn lookup_event_id(&self, user_id: UserId, date: NaiveDate) -> Result<EventId> {
        self.db.scoped(|scope| scope.events().lookup_event_id(user_id, date))
    }

    pub fn list_dates(&self, user_id: UserId) -> Result<Vec<NaiveDate>> {
        self.db.scoped(|scope| scope.events().list_dates(user_id))
    }

    pub fn list_dates_by_state(&self, user_id: UserId, state: &str) -> Result<Vec<NaiveDate>> {
        self.db.scoped(|scope| scope.events().list_dates_by_state(user_id, state))
    }

    pub fn get_event_by_date(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<EventRecord>> {
        self.db.scoped(|scope| scope.events().get_by_date(user_id, date))
    }

    pub fn append_text(
        &self,
        field: AppendField,
        user_id: UserId,
        date: NaiveDate,
        new_value: &str,
    ) -> Result<()> {
        self.db.scoped(|scope| scope.events().append_text(field, user_id, date, new_value))
    }

    pub fn delete_event(&self, user_id: UserId, date: NaiveDate) -> Result<usize> {
        self.db.scoped(|scope| scope.events().delete(user_id, date))
    }

    pub fn add_photo(&self, user_id: UserId, date: NaiveDate, photo: &PhotoRef) -> Result<()> {
        self.db.scoped(|scope| scope.events().add_photo(user_id, date, photo))
    }

    pub fn set_photos(&self, user_id: UserId, date: NaiveDate, photo: &PhotoRef) -> Result<()> {
        self.db.scoped(|scope| scope.events().set_photos(user_id, date, photo))
    }

    pub fn get_photos(&self, user_id: UserId, date: NaiveDate) -> Result<Option<Vec<PhotoRef>>> {
        self.db.scoped(|scope| scope.events().get_photos(user_id, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn store(dir: &TempDir, mode: AppendMode) -> EventStore {
        let config = StoreConfig::new(dir.path().join("events.db")).with_append_mode(mode);
        let store = EventStore::new(Database::new(config).unwrap());
        store.ensure_events_table().unwrap();
        store
    }

    fn new_event(user: i64, number: i64, date: NaiveDate) -> NewEvent {
        NewEvent {
            user_id: UserId(user),
            number,
            date,
            places: "Riverside".to_string(),
            people: "Alice".to_string(),
            state: "planned".to_string(),
            memes: "first meme".to_string(),
        }
    }

    #[test]
    fn test_sequence_numbers_per_user() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);

        assert_eq!(store.next_sequence_number(UserId(1)).unwrap(), 1);

        for (n, d) in [(1, 5), (2, 6), (3, 7)] {
            store.insert_event(&new_event(1, n, day(d))).unwrap();
        }
        store.insert_event(&new_event(2, 1, day(5))).unwrap();

        assert_eq!(store.next_sequence_number(UserId(1)).unwrap(), 4);
        assert_eq!(store.next_sequence_number(UserId(2)).unwrap(), 2);
        assert_eq!(store.next_sequence_number(UserId(3)).unwrap(), 1);
    }

    #[test]
    fn test_sequence_tolerates_gaps() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);

        store.insert_event(&new_event(1, 1, day(1))).unwrap();
        store.insert_event(&new_event(1, 2, day(2))).unwrap();
        store.delete_event(UserId(1), day(1)).unwrap();

        assert_eq!(store.next_sequence_number(UserId(1)).unwrap(), 3);
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);
        let event = new_event(9, 1, day(14));

        store.insert_event(&event).unwrap();

        let record = store.get_event_by_date(UserId(9), day(14)).unwrap();
        assert_eq!(record, Some(event.to_record()));
        assert_eq!(store.get_event_by_date(UserId(9), day(15)).unwrap(), None);
    }

    #[test]
    fn test_lookup_event_id() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);

        let first = store.insert_event(&new_event(1, 1, day(1))).unwrap();
        let second = store.insert_event(&new_event(1, 2, day(2))).unwrap();

        assert_eq!(store.lookup_event_id(UserId(1), day(1)).unwrap(), first);
        assert_eq!(store.lookup_event_id(UserId(1), day(2)).unwrap(), second);

        let err = store.lookup_event_id(UserId(1), day(3)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dates_are_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);

        let mut late = new_event(1, 1, day(20));
        late.state = "done".to_string();
        store.insert_event(&late).unwrap();
        store.insert_event(&new_event(1, 2, day(3))).unwrap();
        let mut middle = new_event(1, 3, day(11));
        middle.state = "done".to_string();
        store.insert_event(&middle).unwrap();
        store.insert_event(&new_event(2, 1, day(1))).unwrap();

        assert_eq!(store.list_dates(UserId(1)).unwrap(), vec![day(3), day(11), day(20)]);
        assert_eq!(
            store.list_dates_by_state(UserId(1), "done").unwrap(),
            vec![day(11), day(20)]
        );
        assert!(store.list_dates_by_state(UserId(1), "cancelled").unwrap().is_empty());
        assert!(store.list_dates(UserId(3)).unwrap().is_empty());
    }

    #[test]
    fn test_append_text_in_both_modes() {
        for mode in [AppendMode::Delimited, AppendMode::ValueTable] {
            let dir = TempDir::new().unwrap();
            let store = store(&dir, mode);
            store.insert_event(&new_event(1, 1, day(1))).unwrap();

            store.append_text(AppendField::People, UserId(1), day(1), "Bob").unwrap();
            store.append_text(AppendField::People, UserId(1), day(1), "Carol").unwrap();
            store.append_text(AppendField::Places, UserId(1), day(1), "Harbor").unwrap();
            store.append_text(AppendField::Memes, UserId(1), day(1), "second meme").unwrap();

            let record = store.get_event_by_date(UserId(1), day(1)).unwrap().unwrap();
            assert_eq!(record.people, "Alice; Bob; Carol", "{mode:?}");
            assert_eq!(record.places, "Riverside; Harbor", "{mode:?}");
            assert_eq!(record.memes, "first meme;\nsecond meme", "{mode:?}");
        }
    }

    #[test]
    fn test_append_text_missing_event() {
        for mode in [AppendMode::Delimited, AppendMode::ValueTable] {
            let dir = TempDir::new().unwrap();
            let store = store(&dir, mode);

            let err = store
                .append_text(AppendField::People, UserId(1), day(1), "Ghost")
                .unwrap_err();
            assert!(err.is_not_found(), "{mode:?}");
        }
    }

    #[test]
    fn test_delete_event() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);
        store.insert_event(&new_event(1, 1, day(1))).unwrap();
        store.append_text(AppendField::People, UserId(1), day(1), "Bob").unwrap();

        assert_eq!(store.delete_event(UserId(1), day(2)).unwrap(), 0);
        assert_eq!(store.list_dates(UserId(1)).unwrap(), vec![day(1)]);

        assert_eq!(store.delete_event(UserId(1), day(1)).unwrap(), 1);
        assert!(store.get_event_by_date(UserId(1), day(1)).unwrap().is_none());

        // A new event on the same day starts without the old appended values.
        store.insert_event(&new_event(1, 2, day(1))).unwrap();
        let record = store.get_event_by_date(UserId(1), day(1)).unwrap().unwrap();
        assert_eq!(record.people, "Alice");
    }

    #[test]
    fn test_deleted_event_id_is_not_reused() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);
        let first = store.insert_event(&new_event(1, 1, day(1))).unwrap();
        store.append_text(AppendField::People, UserId(1), day(1), "Bob").unwrap();
        store.delete_event(UserId(1), day(1)).unwrap();

        let second = store.insert_event(&new_event(1, 2, day(2))).unwrap();
        assert!(second > first);

        let record = store.get_event_by_date(UserId(1), day(2)).unwrap().unwrap();
        assert_eq!(record.people, "Alice");
    }

    fn value_rows(dir: &TempDir) -> i64 {
        let conn = rusqlite::Connection::open(dir.path().join("events.db")).unwrap();
        conn.query_row("SELECT COUNT(*) FROM event_values", [], |row| row.get(0)).unwrap()
    }

    fn forget_append_mode(dir: &TempDir) {
        let conn = rusqlite::Connection::open(dir.path().join("events.db")).unwrap();
        conn.pragma_update(None, "user_version", 0).unwrap();
    }

    #[test]
    fn test_delimited_delete_clears_value_rows() {
        let dir = TempDir::new().unwrap();
        let values = store(&dir, AppendMode::ValueTable);
        values.insert_event(&new_event(1, 1, day(1))).unwrap();
        values.append_text(AppendField::People, UserId(1), day(1), "Bob").unwrap();
        assert_eq!(value_rows(&dir), 1);

        // Unmarked file, as left behind by older builds.
        forget_append_mode(&dir);
        let config = StoreConfig::new(dir.path().join("events.db"))
            .with_append_mode(AppendMode::Delimited);
        let delimited = EventStore::new(Database::new(config).unwrap());
        assert_eq!(delimited.delete_event(UserId(1), day(1)).unwrap(), 1);
        assert_eq!(value_rows(&dir), 0);

        values.insert_event(&new_event(1, 2, day(2))).unwrap();
        let record = values.get_event_by_date(UserId(1), day(2)).unwrap().unwrap();
        assert_eq!(record.people, "Alice");
    }

    #[test]
    fn test_delimited_drop_removes_value_table() {
        let dir = TempDir::new().unwrap();
        let values = store(&dir, AppendMode::ValueTable);
        values.insert_event(&new_event(1, 1, day(1))).unwrap();
        values.append_text(AppendField::People, UserId(1), day(1), "Bob").unwrap();

        forget_append_mode(&dir);
        let config = StoreConfig::new(dir.path().join("events.db"))
            .with_append_mode(AppendMode::Delimited);
        let delimited = EventStore::new(Database::new(config).unwrap());
        delimited.drop_events_table().unwrap();

        let exists = delimited.database().scoped(multivalue::value_table_exists).unwrap();
        assert!(!exists);
    }

    #[test]
    fn test_mismatched_append_mode_is_refused() {
        let dir = TempDir::new().unwrap();
        let values = store(&dir, AppendMode::ValueTable);
        values.insert_event(&new_event(1, 1, day(1))).unwrap();

        let config = StoreConfig::new(dir.path().join("events.db"))
            .with_append_mode(AppendMode::Delimited);
        let delimited = EventStore::new(Database::new(config).unwrap());
        assert!(matches!(
            delimited.ensure_events_table(),
            Err(StoreError::AppendModeMismatch {
                stored: AppendMode::ValueTable,
                configured: AppendMode::Delimited,
            })
        ));
    }

    #[test]
    fn test_photos_accumulate() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);
        store.add_photos_column().unwrap();
        store.insert_event(&new_event(1, 1, day(1))).unwrap();

        assert_eq!(store.get_photos(UserId(1), day(1)).unwrap(), None);

        store.add_photo(UserId(1), day(1), &PhotoRef::from("p1")).unwrap();
        store.add_photo(UserId(1), day(1), &PhotoRef::from("p2")).unwrap();

        assert_eq!(
            store.get_photos(UserId(1), day(1)).unwrap(),
            Some(vec![PhotoRef::from("p1"), PhotoRef::from("p2")])
        );

        store.set_photos(UserId(1), day(1), &PhotoRef::from("p3")).unwrap();
        assert_eq!(
            store.get_photos(UserId(1), day(1)).unwrap(),
            Some(vec![PhotoRef::from("p3")])
        );
    }

    #[test]
    fn test_empty_photos_cell_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);
        store.add_photos_column().unwrap();
        store.insert_event(&new_event(1, 1, day(1))).unwrap();
        store
            .database()
            .scoped(|scope| {
                scope.execute("UPDATE events SET photos = '' WHERE user_id = ?1", params![1])
            })
            .unwrap();

        assert_eq!(store.get_photos(UserId(1), day(1)).unwrap(), None);

        store.add_photo(UserId(1), day(1), &PhotoRef::from("p1")).unwrap();
        assert_eq!(
            store.get_photos(UserId(1), day(1)).unwrap(),
            Some(vec![PhotoRef::from("p1")])
        );

        let raw: Option<String> = store
            .database()
            .scoped(|scope| {
                scope.query_optional(
                    "SELECT photos FROM events WHERE user_id = ?1",
                    params![1],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(raw.as_deref(), Some("p1"));
    }

    #[test]
    fn test_photos_missing_event() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);
        store.add_photos_column().unwrap();

        assert_eq!(store.get_photos(UserId(1), day(1)).unwrap(), None);
        let err = store
            .add_photo(UserId(1), day(1), &PhotoRef::from("p1"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_insert_next_event() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);

        let first = store
            .insert_next_event(UserId(4), day(2), "Park", "Sam", "planned", "kites")
            .unwrap();
        let second = store
            .insert_next_event(UserId(4), day(9), "Beach", "Sam", "planned", "sand")
            .unwrap();

        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(store.get_event_by_date(UserId(4), day(9)).unwrap(), Some(second));
    }

    #[test]
    fn test_drop_events_table() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, AppendMode::ValueTable);
        store.insert_event(&new_event(1, 1, day(1))).unwrap();

        store.drop_events_table().unwrap();
        assert!(matches!(
            store.list_dates(UserId(1)),
            Err(StoreError::Sqlite(_))
        ));

        store.ensure_events_table().unwrap();
        assert!(store.list_dates(UserId(1)).unwrap().is_empty());
    }
}
