//! Policy and engine configuration, loaded from a single JSON document the
//! way the teacher's profile files were (see `save_profile`/`load_profile`
//! in the original `rust-chess-tui::config`), adapted from per-named
//! profiles to one policy document per analysis run.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub engine_path: String,
    pub eval_dump_path: Option<String>,
    pub pool_size: usize,
    pub engine_acquire_timeout_s: u64,
    pub engine_analysis_timeout_s: u64,
    pub nnue_dump_timeout_s: u64,
    pub max_engine_restarts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            engine_path: "stockfish".to_string(),
            eval_dump_path: None,
            pool_size: num_cpus::get().max(1),
            engine_acquire_timeout_s: 5,
            engine_analysis_timeout_s: 15,
            nnue_dump_timeout_s: 8,
            max_engine_restarts: 2,
        }
    }
}

impl EngineConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_acquire_timeout_s)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_analysis_timeout_s)
    }

    pub fn nnue_dump_timeout(&self) -> Duration {
        Duration::from_secs(self.nnue_dump_timeout_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub d2_depth: u32,
    pub d16_depth: u32,
    pub branching_limit: usize,
    pub max_pv_plies: usize,
    pub max_tree_depth: u32,
    pub max_tree_nodes: usize,
    pub max_branch_lines: usize,
    pub max_total_lines: usize,
    pub motifs_top: usize,
    pub max_pattern_plies: usize,
    pub max_line_plies: usize,
    pub threat_significance_cp: i32,
    pub critical_gap_cp: i32,
    pub overrated_claim_limit: usize,
    pub enable_coarse: bool,
    pub enable_mid: bool,
    pub enable_fine: bool,
    pub engine: EngineConfig,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            d2_depth: 2,
            d16_depth: 16,
            branching_limit: 3,
            max_pv_plies: 10,
            max_tree_depth: 7,
            max_tree_nodes: 260,
            max_branch_lines: 18,
            max_total_lines: 140,
            motifs_top: 25,
            max_pattern_plies: 4,
            max_line_plies: 10,
            threat_significance_cp: 60,
            critical_gap_cp: 100,
            overrated_claim_limit: 8,
            enable_coarse: true,
            enable_mid: true,
            enable_fine: true,
            engine: EngineConfig::default(),
        }
    }
}

impl Policy {
    pub fn load(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(io::Error::from)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_round_trips_through_json() {
        let policy = Policy::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        policy.save(&path).unwrap();
        let loaded = Policy::load(&path).unwrap();
        assert_eq!(loaded.d2_depth, policy.d2_depth);
        assert_eq!(loaded.d16_depth, policy.d16_depth);
        assert_eq!(loaded.engine.pool_size, policy.engine.pool_size);
    }

    #[test]
    fn thresholds_match_closed_defaults() {
        let policy = Policy::default();
        assert_eq!(policy.threat_significance_cp, 60);
        assert_eq!(policy.critical_gap_cp, 100);
        assert_eq!(policy.max_tree_depth, 7);
        assert_eq!(policy.max_tree_nodes, 260);
        assert_eq!(policy.max_branch_lines, 18);
        assert_eq!(policy.max_total_lines, 140);
        assert_eq!(policy.motifs_top, 25);
        assert_eq!(policy.max_line_plies, 10);
    }
}
