//! Device tags
//!
//! Resolves a device name to the building unit it measures and the datacenter
//! whose heating/cooling rules apply to it.

use crate::error::IndexError;
use crate::types::DeviceTags;
use std::collections::HashMap;

pub const DEVICE_COLUMN: &str = "device";
pub const UNIT_NUMBER_COLUMN: &str = "unit_number";
pub const DATACENTER_COLUMN: &str = "datacenter";

/// Static device -> tags lookup
pub trait DeviceLookup {
    /// Tags of `device`, or `None` when the device is unknown or has no unit
    fn lookup(&self, device: &str) -> Option<DeviceTags>;
}

/// Tag table loaded from a delimited text export
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    devices: HashMap<String, DeviceTags>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        device: impl Into<String>,
        unit_number: impl Into<String>,
        datacenter: Option<&str>,
    ) {
        self.devices.insert(
            device.into(),
            DeviceTags {
                unit_number: unit_number.into(),
                datacenter: datacenter.map(str::to_string),
            },
        );
    }

    /// Parse a `;`-separated table with a header row.
    ///
    /// Required columns: `device`, `unit_number`; optional: `datacenter`.
    /// Other columns are ignored. Rows with an empty unit number are skipped.
    pub fn parse(text: &str) -> Result<Self, IndexError> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| IndexError::ParseError("tag table is empty".to_string()))?
            .split(';')
            .map(str::trim)
            .collect();

        let column = |name: &str| header.iter().position(|h| *h == name);
        let device_col = column(DEVICE_COLUMN).ok_or_else(|| {
            IndexError::ParseError(format!("tag table lacks a '{DEVICE_COLUMN}' column"))
        })?;
        let unit_col = column(UNIT_NUMBER_COLUMN).ok_or_else(|| {
            IndexError::ParseError(format!("tag table lacks a '{UNIT_NUMBER_COLUMN}' column"))
        })?;
        let datacenter_col = column(DATACENTER_COLUMN);

        let mut table = Self::new();
        for line in lines {
            let cells: Vec<&str> = line.split(';').map(str::trim).collect();
            let cell = |idx: usize| cells.get(idx).copied().filter(|c| !c.is_empty());

            let (Some(device), Some(unit_number)) = (cell(device_col), cell(unit_col)) else {
                continue;
            };
            table.insert(device, unit_number, datacenter_col.and_then(cell));
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceLookup for TagTable {
    fn lookup(&self, device: &str) -> Option<DeviceTags> {
        self.devices.get(device).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_tag_table() {
        let table = TagTable::parse(
            "floor;device;unit_number;datacenter\n\
             1;uhoo-a;101;north\n\
             1;uhoo-b;102;\n\
             ;airly-out;;\n",
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup("uhoo-a"),
            Some(DeviceTags {
                unit_number: "101".to_string(),
                datacenter: Some("north".to_string()),
            })
        );
        assert_eq!(table.lookup("uhoo-b").unwrap().datacenter, None);
        assert_eq!(table.lookup("airly-out"), None);
    }

    #[test]
    fn test_parse_requires_columns() {
        assert!(TagTable::parse("").is_err());
        assert!(TagTable::parse("device;floor\nx;1\n").is_err());
    }

    #[test]
    fn test_parse_without_datacenter_column() {
        let table = TagTable::parse("device;unit_number\nd1;7\n").unwrap();
        assert_eq!(table.lookup("d1").unwrap().unit_number, "7");
    }
}
