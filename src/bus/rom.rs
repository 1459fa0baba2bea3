//! Read-only memory cards.

use crate::bus::{BusError, Region};
use std::path::Path;

/// A ROM card. Writes are dropped.
#[derive(Debug, Clone)]
pub struct Rom {
    name: String,
    data: Vec<u8>,
}

impl Rom {
    /// Wrap the first `size` bytes of `data`.
    pub fn from_bytes(name: impl Into<String>, mut data: Vec<u8>, size: usize) -> Result<Self, BusError> {
        let name = name.into();
        if data.len() < size {
            return Err(BusError::ImageTooShort { name, expected: size, actual: data.len() });
        }
        data.truncate(size);
        Ok(Self { name, data })
    }

    /// Load the first `size` bytes of an image file.
    pub fn load(path: impl AsRef<Path>, size: usize) -> Result<Self, BusError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| BusError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!("loaded ROM image {} ({} bytes)", path.display(), data.len());
        Self::from_bytes(path.display().to_string(), data, size)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Region for Rom {
    fn read_u8(&mut self, offset: u32) -> u8 {
        self.data.get(offset as usize).copied().unwrap_or(0xFF)
    }

    fn write_u8(&mut self, offset: u32, value: u8) {
        tracing::warn!("write of {:02X} to ROM {} at offset {:04X} dropped", value, self.name, offset);
    }
}
