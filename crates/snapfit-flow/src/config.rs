use std::time::Duration;

/// Flow configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Pause between readiness ticks.
    pub tick_interval: Duration,
    /// Upper bound of the random progress increment per tick.
    pub max_increment: f32,
    /// Progress value readiness holds at until the upload is verified.
    pub plateau: f32,
    /// Capture size budget in megabytes.
    pub max_size_mb: f64,
}

impl FlowConfig {
    /// Load configuration from `SNAPFIT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            tick_interval: Duration::from_millis(env_u64("SNAPFIT_TICK_MS", 400)),
            max_increment: env_f32("SNAPFIT_MAX_INCREMENT", 5.0),
            plateau: env_f32("SNAPFIT_PLATEAU", 95.0),
            max_size_mb: env_f64("SNAPFIT_MAX_SIZE_MB", 5.0),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(400),
            max_increment: 5.0,
            plateau: 95.0,
            max_size_mb: 5.0,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
