//! Change events produced by a change source and the notifications the hub
//! derives from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::value::Row;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new row was inserted.
    Inserted,
    /// An existing row was updated.
    Updated,
    /// A row was deleted.
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Inserted => "inserted",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        })
    }
}

/// A raw row change as emitted by a change source.
///
/// The source is external and delivers at-least-once, so every field is
/// checked by [`ChangeEvent::validate`] before the event reaches the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Declared change kind.
    pub kind: ChangeKind,
    /// Affected key. Falls back to the row images when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Row image after the change, absent for deletes.
    #[serde(default, rename = "new", skip_serializing_if = "Option::is_none")]
    pub new_row: Option<Row>,
    /// Row image before the change, absent for inserts.
    #[serde(default, rename = "old", skip_serializing_if = "Option::is_none")]
    pub old_row: Option<Row>,
}

impl ChangeEvent {
    /// Create an insert event.
    pub fn inserted(row: Row) -> Self {
        Self {
            kind: ChangeKind::Inserted,
            key: Some(row.key().to_string()),
            new_row: Some(row),
            old_row: None,
        }
    }

    /// Create an update event.
    pub fn updated(old_row: Option<Row>, new_row: Row) -> Self {
        Self {
            kind: ChangeKind::Updated,
            key: Some(new_row.key().to_string()),
            new_row: Some(new_row),
            old_row,
        }
    }

    /// Create a delete event.
    pub fn deleted(key: impl Into<String>, old_row: Option<Row>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            key: Some(key.into()),
            new_row: None,
            old_row,
        }
    }

    /// Resolve the event key: explicit key first, then the new image, then the old one.
    pub fn resolved_key(&self) -> Option<&str> {
        self.key
            .as_deref()
            .or_else(|| self.new_row.as_ref().map(Row::key))
            .or_else(|| self.old_row.as_ref().map(Row::key))
            .filter(|key| !key.is_empty())
    }

    /// Check the event and reduce it to the change the snapshot applies.
    pub fn validate(self) -> Result<Change, InputError> {
        let key = self.resolved_key().ok_or(InputError::MissingKey)?.to_string();

        for image in [&self.new_row, &self.old_row].into_iter().flatten() {
            if image.key() != key {
                return Err(InputError::KeyMismatch {
                    event_key: key,
                    row_key: image.key().to_string(),
                });
            }
        }

        match self.kind {
            ChangeKind::Inserted | ChangeKind::Updated => {
                let row = self.new_row.ok_or(InputError::MissingRowImage {
                    kind: self.kind,
                    key,
                })?;
                Ok(Change::Upsert {
                    declared: self.kind,
                    row,
                })
            }
            ChangeKind::Deleted => Ok(Change::Delete { key }),
        }
    }
}

/// A validated change, ready for reconciliation.
///
/// Inserts and updates collapse into an upsert: the snapshot decides whether
/// the key is new. The adapter's old image is never trusted over the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert or replace the row.
    Upsert {
        /// Kind the source declared.
        declared: ChangeKind,
        /// New row image.
        row: Row,
    },
    /// Remove the row if present.
    Delete {
        /// Key to remove.
        key: String,
    },
}

impl Change {
    /// Key affected by this change.
    pub fn key(&self) -> &str {
        match self {
            Change::Upsert { row, .. } => row.key(),
            Change::Delete { key } => key,
        }
    }

    /// Kind the source declared, before the snapshot decides the effective one.
    pub fn declared_kind(&self) -> ChangeKind {
        match self {
            Change::Upsert { declared, .. } => *declared,
            Change::Delete { .. } => ChangeKind::Deleted,
        }
    }
}

/// A real state transition, delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Affected key.
    pub key: String,
    /// Effective change kind as decided by the snapshot.
    pub kind: ChangeKind,
    /// Row after the change, absent for deletes.
    pub new_row: Option<Row>,
    /// Row the snapshot held before the change, absent for inserts.
    pub old_row: Option<Row>,
    /// Snapshot version this transition produced.
    pub version: u64,
}

impl Notification {
    /// Field names that differ between the old and new images.
    ///
    /// Inserts list every field of the new row, deletes every field of the old one.
    pub fn changed_fields(&self) -> Vec<String> {
        match (&self.old_row, &self.new_row) {
            (Some(old), Some(new)) => new.diff_fields(old),
            (None, Some(row)) | (Some(row), None) => row.fields().keys().cloned().collect(),
            (None, None) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rome(temp: i64) -> Row {
        Row::new("Rome").with_field("temp", temp)
    }

    #[test]
    fn test_validate_insert() {
        let change = ChangeEvent::inserted(rome(20)).validate().unwrap();
        assert_eq!(
            change,
            Change::Upsert {
                declared: ChangeKind::Inserted,
                row: rome(20)
            }
        );
        assert_eq!(change.key(), "Rome");
    }

    #[test]
    fn test_declared_kind() {
        let update = ChangeEvent::updated(None, rome(25)).validate().unwrap();
        assert_eq!(update.declared_kind(), ChangeKind::Updated);

        let delete = ChangeEvent::deleted("Rome", None).validate().unwrap();
        assert_eq!(delete.declared_kind(), ChangeKind::Deleted);
    }

    #[test]
    fn test_key_falls_back_to_row_images() {
        let event = ChangeEvent {
            kind: ChangeKind::Deleted,
            key: None,
            new_row: None,
            old_row: Some(rome(20)),
        };
        assert_eq!(event.validate().unwrap(), Change::Delete { key: "Rome".into() });
    }

    #[test]
    fn test_missing_key_rejected() {
        let event = ChangeEvent {
            kind: ChangeKind::Deleted,
            key: None,
            new_row: None,
            old_row: None,
        };
        assert_eq!(event.validate(), Err(InputError::MissingKey));

        let event = ChangeEvent::deleted("", None);
        assert_eq!(event.validate(), Err(InputError::MissingKey));
    }

    #[test]
    fn test_missing_new_image_rejected() {
        let event = ChangeEvent {
            kind: ChangeKind::Updated,
            key: Some("Rome".into()),
            new_row: None,
            old_row: Some(rome(20)),
        };
        assert!(matches!(
            event.validate(),
            Err(InputError::MissingRowImage { kind: ChangeKind::Updated, .. })
        ));
    }

    #[test]
    fn test_key_mismatch_rejected() {
        let mut event = ChangeEvent::updated(Some(Row::new("Oslo")), rome(25));
        assert!(matches!(event.clone().validate(), Err(InputError::KeyMismatch { .. })));

        event.old_row = None;
        event.key = Some("Paris".into());
        assert!(matches!(event.validate(), Err(InputError::KeyMismatch { .. })));
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"kind":"updated","key":"Rome","new":{"key":"Rome","fields":{"temp":25}}}"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, ChangeEvent::updated(None, rome(25)));
    }

    #[test]
    fn test_changed_fields() {
        let update = Notification {
            key: "Rome".into(),
            kind: ChangeKind::Updated,
            new_row: Some(rome(25)),
            old_row: Some(rome(20).with_field("sky", "clear")),
            version: 2,
        };
        assert_eq!(update.changed_fields(), vec!["sky", "temp"]);

        let delete = Notification {
            key: "Rome".into(),
            kind: ChangeKind::Deleted,
            new_row: None,
            old_row: Some(rome(20)),
            version: 3,
        };
        assert_eq!(delete.changed_fields(), vec!["temp"]);
    }
}
