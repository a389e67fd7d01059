// ==========================================
// Scheduled Deliveries - configuration layer
// ==========================================
// Storage: config_kv table; every knob carries a default.
// ==========================================

pub mod config_manager;

pub use config_manager::{config_keys, ConfigManager, SchedulerSettings};
