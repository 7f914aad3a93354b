use anyhow::{Context, Result};
use census::normalize_geoid;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::airtable::UPDATE_BATCH_SIZE;
use crate::lookup::TractLookup;
use crate::table::{Record, RecordUpdate, Table};

// Rows between progress lines while looking tracts up
const PROGRESS_EVERY: usize = 100;

/// Which columns to read and write, and how to treat values already present.
#[derive(Clone, Debug)]
pub struct FillOptions {
    pub lat_field: String,
    pub lng_field: String,
    pub tract_field: String,
    /// Replace a tract value that differs from the looked-up one.
    pub override_existing: bool,
    /// Write GEOIDs without leading zeros ("06075010100" -> "6075010100").
    pub strip_leading_zeros: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RowPlan {
    Update(RecordUpdate),
    Unchanged,
    Skipped(SkipReason),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    MissingCoordinates,
    InvalidCoordinates,
    LookupFailed,
    /// The row already holds a different tract and overriding is off.
    Conflict {
        existing: String,
        new: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub fetched: usize,
    pub planned: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct Plan {
    pub updates: Vec<RecordUpdate>,
    pub summary: Summary,
}

/// Fetches every row and works out which ones need their tract field written.
/// A failed fetch aborts; problems with individual rows are logged and skipped.
pub async fn plan_updates<T, L>(
    table: &T,
    lookup: &L,
    options: &FillOptions,
    limit: Option<usize>,
) -> Result<Plan>
where
    T: Table + ?Sized,
    L: TractLookup + ?Sized,
{
    let records = table.records(limit).await.context("retrieving rows")?;
    info!(rows = records.len(), "retrieved rows");

    let mut summary = Summary {
        fetched: records.len(),
        ..Summary::default()
    };
    let total = records.len();
    let mut updates = Vec::new();
    for (n, record) in records.iter().enumerate() {
        match plan_row(lookup, record, options).await {
            RowPlan::Update(update) => updates.push(update),
            RowPlan::Unchanged => summary.unchanged += 1,
            RowPlan::Skipped(_) => summary.skipped += 1,
        }
        let done = n + 1;
        if done % PROGRESS_EVERY == 0 || done == total {
            info!(done, total, "querying for census data");
        }
    }
    summary.planned = updates.len();
    Ok(Plan { updates, summary })
}

pub async fn plan_row<L>(lookup: &L, record: &Record, options: &FillOptions) -> RowPlan
where
    L: TractLookup + ?Sized,
{
    let id = record.id.as_str();
    let (lat, lng) = match (
        coordinate(&record.fields, &options.lat_field),
        coordinate(&record.fields, &options.lng_field),
    ) {
        (Coordinate::Value(lat), Coordinate::Value(lng)) if valid_lat_lng(lat, lng) => (lat, lng),
        (Coordinate::Missing, _) | (_, Coordinate::Missing) => {
            warn!(row = id, "skipping row because it is missing a lat-lng value");
            return RowPlan::Skipped(SkipReason::MissingCoordinates);
        }
        _ => {
            warn!(
                row = id,
                lat = ?record.fields.get(&options.lat_field),
                lng = ?record.fields.get(&options.lng_field),
                "skipping row because its lat-lng value is not a valid coordinate"
            );
            return RowPlan::Skipped(SkipReason::InvalidCoordinates);
        }
    };

    let tract = match lookup.tract(lat, lng).await {
        Ok(tract) => tract,
        Err(e) => {
            warn!(row = id, lat, lng, "skipping row because the tract lookup failed: {e:#}");
            return RowPlan::Skipped(SkipReason::LookupFailed);
        }
    };
    let new = match tract {
        Some(geoid) if options.strip_leading_zeros => Some(normalize_geoid(&geoid)),
        Some(geoid) => Some(geoid),
        None => {
            info!(row = id, lat, lng, "no tract contains this point");
            None
        }
    };

    let existing = record.fields.get(&options.tract_field).and_then(field_text);
    if existing == new {
        debug!(row = id, "tract already up to date");
        return RowPlan::Unchanged;
    }
    if let Some(existing) = existing {
        if !options.override_existing {
            warn!(
                row = id,
                %existing,
                new = new.as_deref().unwrap_or(""),
                "skipping row because its existing tract differs from the new value"
            );
            return RowPlan::Skipped(SkipReason::Conflict { existing, new });
        }
    }

    let value = new.map(Value::String).unwrap_or(Value::Null);
    RowPlan::Update(RecordUpdate::single(id, options.tract_field.as_str(), value))
}

/// Writes updates in batches. The table rejects a whole batch when any row in it
/// is bad, so a failed batch is resent one row at a time and only the rows that
/// still fail are logged and counted.
pub async fn apply_updates<T>(table: &T, updates: &[RecordUpdate], summary: &mut Summary)
where
    T: Table + ?Sized,
{
    for batch in updates.chunks(UPDATE_BATCH_SIZE) {
        let Err(e) = table.update(batch).await else {
            summary.updated += batch.len();
            continue;
        };
        if batch.len() == 1 {
            error!(row = %batch[0].id, "failed to update row: {e:#}");
            summary.failed += 1;
            continue;
        }
        warn!(rows = batch.len(), "batch update failed, retrying rows one by one: {e:#}");
        for update in batch {
            match table.update(std::slice::from_ref(update)).await {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    error!(row = %update.id, "failed to update row: {e:#}");
                    summary.failed += 1;
                }
            }
        }
    }
}

enum Coordinate {
    Missing,
    Invalid,
    Value(f64),
}

fn coordinate(fields: &Map<String, Value>, name: &str) -> Coordinate {
    match fields.get(name) {
        None => Coordinate::Missing,
        Some(value) => coordinate_value(value),
    }
}

fn coordinate_value(value: &Value) -> Coordinate {
    match value {
        Value::Null => Coordinate::Missing,
        Value::Number(n) => n.as_f64().map_or(Coordinate::Invalid, Coordinate::Value),
        Value::String(s) if s.trim().is_empty() => Coordinate::Missing,
        Value::String(s) => s
            .trim()
            .parse()
            .map_or(Coordinate::Invalid, Coordinate::Value),
        // Lookup and rollup fields come back as single element arrays
        Value::Array(items) if items.is_empty() => Coordinate::Missing,
        Value::Array(items) if items.len() == 1 => coordinate_value(&items[0]),
        _ => Coordinate::Invalid,
    }
}

fn valid_lat_lng(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && lat.abs() <= 90.0 && lng.abs() <= 180.0
}

/// Text form of a field value for comparing against a GEOID.
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(match (n.as_u64(), n.as_f64()) {
            (Some(n), _) => n.to_string(),
            (None, Some(f)) if f.fract() == 0.0 => format!("{f:.0}"),
            _ => n.to_string(),
        }),
        Value::Array(items) if items.len() == 1 => field_text(&items[0]),
        other => Some(other.to_string()),
    }
}
