//! Database access for persisted preferences

pub mod settings;

pub use settings::{SettingsStore, StoredPrefs};
