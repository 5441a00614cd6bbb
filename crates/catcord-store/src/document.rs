//! Documents and the snapshots delivered to watchers.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

/// A stored document: its id within a collection plus its JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Decode the fields into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Read a single string field, if present.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// One observed state of a single document.
///
/// `data` is `None` when the document does not exist at that point, either
/// because it was never written or because it has been deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Option<Value>,
}

impl DocumentSnapshot {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Decode into a typed record. `Ok(None)` when the document is absent,
    /// an error when it exists but does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            Some(data) => Ok(Some(serde_json::from_value(data.clone())?)),
            None => Ok(None),
        }
    }
}
