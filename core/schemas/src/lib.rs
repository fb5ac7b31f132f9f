use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ID Types
// ============================================================================

/// Chat-side identifier of the user who owns an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Surrogate key of a row in the `events` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub i64);

/// Opaque reference to a photo stored by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoRef(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PhotoRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PhotoRef {
    fn from(value: &str) -> Self {
        PhotoRef(value.to_string())
    }
}

// ============================================================================
// Event Schema
// ============================================================================

/// Everything needed to create an event row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub user_id: UserId,
    pub number: i64,
    pub date: NaiveDate,
    pub places: String,
    pub people: String,
    pub state: String,
    pub memes: String,
}

/// An event as shown back to the user.
///
/// `people`, `places` and `memes` carry the accumulated text, joined with the
/// separator of their [`AppendField`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub number: i64,
    pub date: NaiveDate,
    pub state: String,
    pub people: String,
    pub places: String,
    pub memes: String,
}

/// Text columns that grow by appending values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppendField {
    #[serde(rename = "people")]
    People,
    #[serde(rename = "places")]
    Places,
    #[serde(rename = "memes")]
    Memes,
}

impl AppendField {
    pub const ALL: [AppendField; 3] = [AppendField::People, AppendField::Places, AppendField::Memes];

    /// Column name in the `events` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppendField::People => "people",
            AppendField::Places => "places",
            AppendField::Memes => "memes",
        }
    }

    pub fn separator(&self) -> &'static str {
        match self {
            AppendField::People | AppendField::Places => "; ",
            AppendField::Memes => ";\n",
        }
    }

    /// Join an existing value and a new one the way the field accumulates.
    pub fn join(&self, existing: &str, new_value: &str) -> String {
        format!("{}{}{}", existing, self.separator(), new_value)
    }
}

impl fmt::Display for AppendField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NewEvent {
    /// The record this event reads back as right after insertion.
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            number: self.number,
            date: self.date,
            state: self.state.clone(),
            people: self.people.clone(),
            places: self.places.clone(),
            memes: self.memes.clone(),
        }
    }
}
