//! Persistent preference store
//!
//! Key-value `settings` table in sqlite. Holds the user preferences the
//! engine reads at construction and writes on setter commands: sound
//! quality, wifi-only, and ignore-focus-loss.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use resona_common::SoundQuality;

use crate::error::{Error, Result};

const KEY_SOUND_QUALITY: &str = "sound_quality";
const KEY_WIFI_ONLY: &str = "only_wifi_network";
const KEY_IGNORE_FOCUS: &str = "ignore_audio_focus_loss";

/// Preferences loaded at engine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredPrefs {
    pub sound_quality: SoundQuality,
    pub wifi_only: bool,
    pub ignore_focus_loss: bool,
}

impl Default for StoredPrefs {
    fn default() -> Self {
        Self {
            sound_quality: SoundQuality::Standard,
            wifi_only: false,
            ignore_focus_loss: false,
        }
    }
}

/// Sqlite-backed settings store.
#[derive(Clone)]
pub struct SettingsStore {
    pool: Pool<Sqlite>,
}

impl SettingsStore {
    /// Open (creating if needed) the settings database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Settings database opened: {}", path.display());
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests and default wiring.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load all engine preferences, defaulting missing keys.
    pub async fn load_prefs(&self) -> Result<StoredPrefs> {
        let defaults = StoredPrefs::default();
        Ok(StoredPrefs {
            sound_quality: self
                .get_setting::<SoundQuality>(KEY_SOUND_QUALITY)
                .await?
                .unwrap_or(defaults.sound_quality),
            wifi_only: self
                .get_setting::<bool>(KEY_WIFI_ONLY)
                .await?
                .unwrap_or(defaults.wifi_only),
            ignore_focus_loss: self
                .get_setting::<bool>(KEY_IGNORE_FOCUS)
                .await?
                .unwrap_or(defaults.ignore_focus_loss),
        })
    }

    pub async fn save_sound_quality(&self, quality: SoundQuality) -> Result<()> {
        self.set_setting(KEY_SOUND_QUALITY, quality).await
    }

    pub async fn save_wifi_only(&self, enabled: bool) -> Result<()> {
        self.set_setting(KEY_WIFI_ONLY, enabled).await
    }

    pub async fn save_ignore_focus_loss(&self, enabled: bool) -> Result<()> {
        self.set_setting(KEY_IGNORE_FOCUS, enabled).await
    }

    /// Generic setting getter
    ///
    /// Returns None if key doesn't exist in database.
    /// Parses value from string using FromStr trait.
    pub async fn get_setting<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(s) => match s.parse::<T>() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => Err(Error::Config(format!(
                    "Failed to parse setting '{}' value: {}",
                    key, s
                ))),
            },
            None => Ok(None),
        }
    }

    /// Generic setting setter
    ///
    /// Inserts or updates setting in database.
    pub async fn set_setting<T: ToString>(&self, key: &str, value: T) -> Result<()> {
        let value_str = value.to_string();

        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value_str)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
