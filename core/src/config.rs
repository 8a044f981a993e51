use serde::{Deserialize, Serialize};

/// Persistence adapter limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum operations committed in one batch chunk.
    pub max_batch_size: usize,
    /// Per-call wait for a locked database before failing with a timeout.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_batch_size:  500,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessBand {
    pub min_distance: f64,
    pub rating:       f64,
}

/// Tunable constants of the standard scoring rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub missed_appointment_penalty:     f64,
    pub default_assessment_score:       f64,
    pub injury_penalty_minor:           f64,
    pub injury_penalty_moderate:        f64,
    pub injury_penalty_severe:          f64,
    pub value_per_score_point:          f64,
    /// Combined attendance + medical score at which value equals market value.
    pub value_reference_score:          f64,
    pub cohesion_attendance_weight:     f64,
    pub fitness_bands:                  Vec<FitnessBand>,
    pub performance_distance_threshold: f64,
    pub selection_fitness_floor:        f64,
    pub ai_risk_threshold:              f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            missed_appointment_penalty:     0.5,
            default_assessment_score:       8.0,
            injury_penalty_minor:           0.5,
            injury_penalty_moderate:        1.5,
            injury_penalty_severe:          3.0,
            value_per_score_point:          3_500.0,
            value_reference_score:          18.0,
            cohesion_attendance_weight:     0.8,
            fitness_bands: vec![
                FitnessBand { min_distance: 6_000.0, rating: 8.5 },
                FitnessBand { min_distance: 5_000.0, rating: 7.4 },
                FitnessBand { min_distance: 0.0,     rating: 6.2 },
            ],
            performance_distance_threshold: 6_000.0,
            selection_fitness_floor:        7.0,
            ai_risk_threshold:              0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub default_history_limit: usize,
    pub max_history_limit:     usize,
    /// Window for the "recent AI analyses" count in integrity reports.
    pub recent_analysis_days:  i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            default_history_limit: 50,
            max_history_limit:     1_000,
            recent_analysis_days:  30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel players in bulk and sync batches. Size it to the store's
    /// concurrent-connection budget.
    pub worker_threads: usize,
    pub store:          StoreConfig,
    pub scoring:        ScoringConfig,
    pub audit:          AuditConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            store:          StoreConfig::default(),
            scoring:        ScoringConfig::default(),
            audit:          AuditConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing keys fall back to defaults.
    /// In tests, use EngineConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.check()?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in tests: two workers and a
    /// small batch size so chunking is exercised without thousands of rows.
    pub fn default_test() -> Self {
        Self {
            worker_threads: 2,
            store: StoreConfig {
                max_batch_size:  4,
                busy_timeout_ms: 1_000,
            },
            ..Self::default()
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.worker_threads > 0, "worker_threads must be at least 1");
        anyhow::ensure!(self.store.max_batch_size > 0, "store.max_batch_size must be at least 1");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.scoring.cohesion_attendance_weight),
            "scoring.cohesion_attendance_weight must be within [0, 1]"
        );
        anyhow::ensure!(
            !self.scoring.fitness_bands.is_empty(),
            "scoring.fitness_bands must not be empty"
        );
        Ok(())
    }
}
