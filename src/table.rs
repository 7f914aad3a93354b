use std::sync::Mutex;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row as returned by the table API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    // Airtable omits empty fields entirely
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
}

/// Field values to write to an existing row. `Value::Null` clears a field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RecordUpdate {
    pub fn single(id: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(field.into(), value);
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Reads and updates the rows of one remote table.
#[async_trait]
pub trait Table {
    /// Fetches every row, following pagination, stopping after `max_records` if given.
    async fn records(&self, max_records: Option<usize>) -> anyhow::Result<Vec<Record>>;
    /// Writes one batch of updates. A batch either succeeds or fails as a whole.
    async fn update(&self, updates: &[RecordUpdate]) -> anyhow::Result<()>;
}

/// Table held in memory, with the same update semantics as Airtable: unknown ids
/// fail the batch, null clears a field.
#[derive(Debug, Default)]
pub struct MemoryTable {
    records: Mutex<Vec<Record>>,
}

impl MemoryTable {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl Table for MemoryTable {
    async fn records(&self, max_records: Option<usize>) -> anyhow::Result<Vec<Record>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory table lock poisoned"))?;
        Ok(records
            .iter()
            .take(max_records.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn update(&self, updates: &[RecordUpdate]) -> anyhow::Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory table lock poisoned"))?;
        if let Some(missing) = updates
            .iter()
            .find(|update| !records.iter().any(|r| r.id == update.id))
        {
            bail!("record {} not found", missing.id);
        }
        for update in updates {
            let Some(record) = records.iter_mut().find(|r| r.id == update.id) else {
                continue;
            };
            for (field, value) in &update.fields {
                if value.is_null() {
                    record.fields.remove(field);
                } else {
                    record.fields.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}
