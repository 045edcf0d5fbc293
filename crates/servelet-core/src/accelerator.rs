//! Accelerator detection

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// NeuronCores exposed by each Inferentia device
pub const CORES_PER_DEVICE: u32 = 4;

/// Represents a Neuron device node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronDevice {
    /// Device index (`/dev/neuron<index>`)
    pub index: u32,
    /// Device node path
    pub path: PathBuf,
}

/// Accelerator information for the host
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AcceleratorInfo {
    /// Detected devices, sorted by index
    pub devices: Vec<NeuronDevice>,
}

impl AcceleratorInfo {
    /// No accelerator detected
    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Total number of NeuronCores
    pub fn core_count(&self) -> u32 {
        self.devices.len() as u32 * CORES_PER_DEVICE
    }

    /// Default core-group sizing: one group spanning every detected core
    pub fn default_group_sizes(&self) -> String {
        match self.core_count() {
            0 => "1".to_string(),
            n => n.to_string(),
        }
    }
}

/// Detect Neuron devices under `/dev`
pub fn detect_accelerators() -> AcceleratorInfo {
    detect_accelerators_in(Path::new("/dev"))
}

/// Detect Neuron devices by scanning `dev_dir` for `neuron<N>` nodes
pub fn detect_accelerators_in(dev_dir: &Path) -> AcceleratorInfo {
    let entries = match std::fs::read_dir(dev_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dev_dir.display(), error = %e, "Cannot scan for accelerators");
            return AcceleratorInfo::empty();
        }
    };

    let mut devices: Vec<NeuronDevice> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name.to_str()?.strip_prefix("neuron")?.parse::<u32>().ok()?;
            Some(NeuronDevice {
                index,
                path: entry.path(),
            })
        })
        .collect();
    devices.sort_by_key(|d| d.index);

    debug!(devices = devices.len(), "Accelerator scan complete");
    AcceleratorInfo { devices }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accelerator_info_empty() {
        let info = AcceleratorInfo::empty();
        assert_eq!(info.core_count(), 0);
        assert_eq!(info.default_group_sizes(), "1");
    }

    #[test]
    fn test_detect_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["neuron1", "neuron0", "neuron-extra", "null"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let info = detect_accelerators_in(dir.path());
        let indices: Vec<u32> = info.devices.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(info.core_count(), 8);
        assert_eq!(info.default_group_sizes(), "8");
    }

    #[test]
    fn test_detect_missing_directory() {
        let info = detect_accelerators_in(Path::new("/nonexistent/dev"));
        assert!(info.devices.is_empty());
    }
}
