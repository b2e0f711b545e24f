use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::limits::{MAX_SLOTS_PER_DAY, MIN_STEP_MINUTES};
use crate::model::Slot;

/// Grid parameters for one deployment. The default studio runs
/// 09:00–20:00 in 30-minute steps (22 slots).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridConfig {
    pub start_minute: u32,
    pub end_minute: u32,
    pub step_minutes: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            start_minute: 9 * 60,
            end_minute: 20 * 60,
            step_minutes: 30,
        }
    }
}

/// Invalid grid parameters. Fatal at startup — there is no sensible
/// fallback grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyWindow { start_minute: u32, end_minute: u32 },
    StepTooSmall(u32),
    UnevenStep { window: u32, step_minutes: u32 },
    WindowPastMidnight(u32),
    TooManySlots(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EmptyWindow { start_minute, end_minute } => {
                write!(f, "grid window is empty: [{start_minute}, {end_minute})")
            }
            ConfigError::StepTooSmall(step) => {
                write!(f, "step of {step} minutes is below the minimum of {MIN_STEP_MINUTES}")
            }
            ConfigError::UnevenStep { window, step_minutes } => {
                write!(f, "step {step_minutes} does not evenly divide the {window}-minute window")
            }
            ConfigError::WindowPastMidnight(end) => {
                write!(f, "grid end {end} is past midnight (1440)")
            }
            ConfigError::TooManySlots(n) => write!(f, "grid would have {n} slots"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// The canonical ordered slot sequence for a day. Deterministic and
/// gapless over `[start, end)`; cheap to clone (slots are shared).
#[derive(Debug, Clone)]
pub struct SlotGrid {
    config: GridConfig,
    slots: Arc<Vec<Slot>>,
}

// Grids never change within a deployment; cache per parameter triple.
fn cache() -> &'static DashMap<GridConfig, Arc<Vec<Slot>>> {
    static CACHE: OnceLock<DashMap<GridConfig, Arc<Vec<Slot>>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

impl SlotGrid {
    /// Generate (or fetch from cache) the slot sequence for `config`.
    pub fn generate(config: GridConfig) -> Result<Self, ConfigError> {
        let GridConfig { start_minute, end_minute, step_minutes } = config;
        if end_minute <= start_minute {
            return Err(ConfigError::EmptyWindow { start_minute, end_minute });
        }
        if end_minute > 24 * 60 {
            return Err(ConfigError::WindowPastMidnight(end_minute));
        }
        if step_minutes < MIN_STEP_MINUTES {
            return Err(ConfigError::StepTooSmall(step_minutes));
        }
        let window = end_minute - start_minute;
        if window % step_minutes != 0 {
            return Err(ConfigError::UnevenStep { window, step_minutes });
        }
        let count = (window / step_minutes) as usize;
        if count > MAX_SLOTS_PER_DAY {
            return Err(ConfigError::TooManySlots(count));
        }

        if let Some(cached) = cache().get(&config) {
            return Ok(Self {
                config,
                slots: cached.value().clone(),
            });
        }

        let slots: Vec<Slot> = (0..count)
            .map(|i| Slot::new(start_minute + (i as u32) * step_minutes, step_minutes))
            .collect();
        let slots = Arc::new(slots);
        cache().insert(config, slots.clone());
        Ok(Self { config, slots })
    }

    /// The default studio grid. Infallible: the default config is valid.
    pub fn studio_default() -> Self {
        Self::generate(GridConfig::default()).expect("default grid config is valid")
    }

    pub fn config(&self) -> GridConfig {
        self.config
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Slot> {
        self.slots.get(index).copied()
    }
}
