//! Machine configuration.
//!
//! A [`MachineConfig`] describes the cards plugged into the machine and
//! how the CPU comes out of reset. It is read from JSON; every field has
//! a default, so a config file only names what it changes.

use crate::cpu::execute::RESET_VECTOR;
use crate::cpu::mmu::BankSelect;
use crate::devices::diag::DIAG_BASE;
use crate::devices::mux::MUX_BASE;
use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Power-on values.
mod defaults {
    /// Switch value the CPU card's sense switches read at power-on.
    pub const CPU_SWITCHES: u8 = 1;

    /// Switch value of the diagnostic card at power-on.
    pub const DIAG_SWITCHES: u8 = 13;

    /// Instructions run between host I/O flushes.
    pub const BATCH_SIZE: u64 = 10_000;
}

/// Configuration of a whole machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// PC after reset.
    pub reset_vector: u16,
    /// CPU front-panel sense switches, tested by BS1-BS4.
    pub cpu_switches: u8,
    /// How the MMU picks the translating bank.
    pub mmu_bank_select: BankSelect,
    /// Instructions run between host I/O flushes.
    pub batch_size: u64,
    pub ram: Vec<RamConfig>,
    pub roms: Vec<RomConfig>,
    pub mux: Option<MuxConfig>,
    pub diag: Option<DiagConfig>,
}

/// A RAM card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamConfig {
    pub start: u32,
    pub size: u32,
    /// Second physical address answering from the same storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<u32>,
}

/// A ROM image mapped onto the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomConfig {
    pub path: PathBuf,
    pub start: u32,
    pub size: u32,
    /// Skip the image with a warning when it cannot be loaded.
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    pub base: u32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self { base: MUX_BASE }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    pub base: u32,
    pub switches: u8,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self { base: DIAG_BASE, switches: defaults::DIAG_SWITCHES }
    }
}

impl Default for MachineConfig {
    /// The reference machine: 256K of RAM around the diagnostic ROMs and
    /// the I/O page, the diagnostic card with its auxiliary RAM, one mux
    /// and the bootstrap ROM under the reset vector.
    fn default() -> Self {
        Self {
            reset_vector: RESET_VECTOR,
            cpu_switches: defaults::CPU_SWITCHES,
            mmu_bank_select: BankSelect::Explicit,
            batch_size: defaults::BATCH_SIZE,
            ram: vec![
                RamConfig { start: 0x00000, size: 0x8000, mirror: None },
                RamConfig { start: 0x0A000, size: 0x1800, mirror: None },
                RamConfig { start: 0x0B800, size: 0x0400, mirror: Some(0x0BC00) },
                RamConfig { start: 0x0C000, size: 0x33000, mirror: None },
            ],
            roms: vec![
                rom("roms/Diag_F1_Rev_1.0.BIN", 0x08000, 0x0800, true),
                rom("roms/Diag_F2_Rev_1.0.BIN", 0x08800, 0x0800, true),
                rom("roms/Diag_F3_Rev_1.0.BIN", 0x09000, 0x0800, true),
                rom("roms/Diag_F4_1133CMD.BIN", 0x09800, 0x0800, true),
                rom("roms/bootstrap_unscrambled.bin", 0x3FC00, 0x0200, false),
            ],
            mux: Some(MuxConfig::default()),
            diag: Some(DiagConfig::default()),
        }
    }
}

fn rom(path: &str, start: u32, size: u32, optional: bool) -> RomConfig {
    RomConfig { path: PathBuf::from(path), start, size, optional }
}

impl MachineConfig {
    /// Read a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!("loaded machine config from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
