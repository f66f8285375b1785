//! Wizard JSON configuration, per spec.md §6. Persists the full argument
//! set to `wizard.conf` (or whatever path the CLI passes) and reads the
//! external miner's `mining.conf` for additional plot directories.

use crate::error::PlotError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardConfig {
    pub key: u64,
    pub plotter_path_name: PathBuf,
    pub plot_core: u8,
    pub plot_mem_usage: String,
    pub miner_path_name: Option<PathBuf>,
    pub mining_conf_path_name: Option<PathBuf>,
    #[serde(default)]
    pub b_restart_miner: bool,
    pub min_plot_size: u64,
    pub max_plot_size: u64,
    /// `path -> bytes`, with a wildcard entry keyed `"*"`.
    pub min_disk_free: BTreeMap<String, u64>,
    pub tmp_dir_name: Option<PathBuf>,
    /// Kept sorted so the wizard's round-robin order is deterministic.
    pub plot_dir_names: Vec<PathBuf>,
}

impl WizardConfig {
    pub fn load(path: &Path) -> Result<WizardConfig, PlotError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| PlotError::Io(format!("reading {}: {e}", path.display())))?;
        let mut config: WizardConfig = serde_json::from_str(&data)
            .map_err(|e| PlotError::Format(format!("parsing {}: {e}", path.display())))?;
        config.plot_dir_names.sort();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), PlotError> {
        let mut sorted = self.clone();
        sorted.plot_dir_names.sort();
        let data = serde_json::to_string_pretty(&sorted)
            .map_err(|e| PlotError::Format(format!("serializing config: {e}")))?;
        std::fs::write(path, data).map_err(|e| PlotError::Io(format!("writing {}: {e}", path.display())))
    }

    /// Minimum free bytes to preserve on `dir`, falling back to the `"*"`
    /// wildcard entry, or `0` if neither is configured.
    pub fn min_disk_free_for(&self, dir: &Path) -> u64 {
        let key = dir.to_string_lossy().to_string();
        self.min_disk_free
            .get(&key)
            .or_else(|| self.min_disk_free.get("*"))
            .copied()
            .unwrap_or(0)
    }

    /// Merges the directories listed in the external miner's `mining.conf`
    /// (`mining.plots[]`) into the wizard's own plot directory set.
    pub fn merge_mining_conf_plots(&mut self) -> Result<(), PlotError> {
        let Some(conf_path) = &self.mining_conf_path_name else {
            return Ok(());
        };
        let mining_conf = MiningConf::load(conf_path)?;
        for dir in mining_conf.mining.plots {
            if !self.plot_dir_names.contains(&dir) {
                self.plot_dir_names.push(dir);
            }
        }
        self.plot_dir_names.sort();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConf {
    pub mining: MiningSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningSection {
    #[serde(default)]
    pub plots: Vec<PathBuf>,
}

impl MiningConf {
    pub fn load(path: &Path) -> Result<MiningConf, PlotError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| PlotError::Io(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&data).map_err(|e| PlotError::Format(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_config() -> WizardConfig {
        WizardConfig {
            key: 1,
            plotter_path_name: PathBuf::from("/usr/bin/plotter"),
            plot_core: 1,
            plot_mem_usage: "4g".into(),
            miner_path_name: None,
            mining_conf_path_name: None,
            b_restart_miner: false,
            min_plot_size: 1 << 30,
            max_plot_size: 1 << 40,
            min_disk_free: BTreeMap::from([("*".to_string(), 1 << 30)]),
            tmp_dir_name: None,
            plot_dir_names: vec![PathBuf::from("/mnt/b"), PathBuf::from("/mnt/a")],
        }
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wizard.conf");
        let config = sample_config();
        config.save(&path).unwrap();
        let loaded = WizardConfig::load(&path).unwrap();
        assert_eq!(loaded.key, 1);
        assert_eq!(loaded.plot_dir_names, vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]);
    }

    #[test]
    fn min_disk_free_falls_back_to_wildcard() {
        let config = sample_config();
        assert_eq!(config.min_disk_free_for(Path::new("/mnt/unknown")), 1 << 30);
    }

    #[test]
    fn merges_mining_conf_plots() {
        let dir = tempdir().unwrap();
        let mining_path = dir.path().join("mining.conf");
        std::fs::write(&mining_path, r#"{"mining":{"plots":["/mnt/c"]}}"#).unwrap();
        let mut config = sample_config();
        config.mining_conf_path_name = Some(mining_path);
        config.merge_mining_conf_plots().unwrap();
        assert!(config.plot_dir_names.contains(&PathBuf::from("/mnt/c")));
    }
}
