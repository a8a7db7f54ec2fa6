//! CSV export of donation history and hospital inventory.

use crate::types::{DonationHistoryEntry, InventoryRecord};
use crate::Result;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// A row in the donation history CSV
#[derive(Debug, Serialize)]
struct HistoryRow {
    scheduled_for: String,
    hospital: String,
    status: String,
    points_earned: u64,
    notes: String,
}

impl From<&DonationHistoryEntry> for HistoryRow {
    fn from(entry: &DonationHistoryEntry) -> Self {
        HistoryRow {
            scheduled_for: entry.scheduled_for.to_rfc3339(),
            hospital: entry.hospital.to_string(),
            status: entry.status.to_string(),
            points_earned: entry.points_earned,
            notes: entry.notes.clone(),
        }
    }
}

/// A row in the inventory CSV
#[derive(Debug, Serialize)]
struct InventoryRow {
    hospital: String,
    blood_group: String,
    units: u32,
    last_updated: String,
}

impl From<&InventoryRecord> for InventoryRow {
    fn from(record: &InventoryRecord) -> Self {
        InventoryRow {
            hospital: record.hospital.to_string(),
            blood_group: record.blood_group.to_string(),
            units: record.units,
            last_updated: record.last_updated.to_rfc3339(),
        }
    }
}

/// Write a donation history to `path`, replacing any existing file
pub fn write_history_csv(entries: &[DonationHistoryEntry], path: &Path) -> Result<usize> {
    write_rows(entries.iter().map(HistoryRow::from), path)
}

/// Write inventory records to `path`, replacing any existing file
pub fn write_inventory_csv(records: &[InventoryRecord], path: &Path) -> Result<usize> {
    write_rows(records.iter().map(InventoryRow::from), path)
}

fn write_rows<R: Serialize>(rows: impl Iterator<Item = R>, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_writer(File::create(path)?);
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Exported {} rows to {:?}", count, path);
    Ok(count)
}
