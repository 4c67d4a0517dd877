//! Versioned store preferences persisted as a JSON document.
//!
//! The web client kept a flat, unversioned preferences object in browser
//! storage. [`SettingsStore::load`] accepts that legacy shape and migrates it
//! to the current schema; everything written back carries `version`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::classify::{StockThresholds, NEAR_EXPIRY_DAYS};
use crate::error::{EngineError, Result};
use crate::export::CsvMode;
use crate::records::{value_f64, value_str, FieldRef};

pub const SETTINGS_VERSION: u32 = 1;
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub store_name: String,
    #[serde(default)]
    pub store_address: Option<String>,
    #[serde(default)]
    pub store_phone: Option<String>,
    #[serde(default = "default_currency", alias = "currency_symbol")]
    pub currency_symbol: String,
    /// chrono pattern for dates in exports and print views.
    #[serde(default = "default_date_format", alias = "date_format")]
    pub date_format: String,
    #[serde(default, alias = "stock_thresholds")]
    pub stock_thresholds: StockThresholds,
    #[serde(default = "default_near_expiry_days", alias = "near_expiry_days")]
    pub near_expiry_days: i64,
    #[serde(default, alias = "csv_mode")]
    pub csv_mode: CsvMode,
    #[serde(default, alias = "export_dir")]
    pub export_dir: Option<PathBuf>,
    #[serde(default, alias = "api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_timeout_secs", alias = "request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default, alias = "invoice_footer")]
    pub invoice_footer: Option<String>,
}

fn default_currency() -> String {
    "$".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_near_expiry_days() -> i64 {
    NEAR_EXPIRY_DAYS
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            store_name: String::new(),
            store_address: None,
            store_phone: None,
            currency_symbol: default_currency(),
            date_format: default_date_format(),
            stock_thresholds: StockThresholds::default(),
            near_expiry_days: default_near_expiry_days(),
            csv_mode: CsvMode::Raw,
            export_dir: None,
            api_base_url: String::new(),
            request_timeout_secs: default_timeout_secs(),
            invoice_footer: None,
        }
    }
}

impl Settings {
    /// Directory for CSV exports and print views; falls back to the system
    /// temp dir.
    pub fn output_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Upgrades a stored document to the current schema.
pub fn migrate(raw: Value) -> Result<Settings> {
    let stored = raw.get("version").and_then(Value::as_u64).unwrap_or(0);
    let version = u32::try_from(stored)
        .map_err(|_| EngineError::UnsupportedSettingsVersion(stored))?;
    match version {
        0 => Ok(migrate_v0(&raw)),
        SETTINGS_VERSION => Ok(serde_json::from_value(raw)?),
        newer => Err(EngineError::UnsupportedSettingsVersion(u64::from(newer))),
    }
}

/// The legacy flat object: `{ storeName, currency, lowStockThreshold, ... }`.
fn migrate_v0(raw: &Value) -> Settings {
    let defaults = Settings::default();
    let text = |paths: &[&str]| value_str(raw, &FieldRef::from(paths));
    let number = |paths: &[&str]| value_f64(raw, &FieldRef::from(paths));

    let csv_mode = match text(&["csvMode", "csv_mode"]).as_deref() {
        Some("quoted") => CsvMode::Quoted,
        _ => CsvMode::Raw,
    };

    Settings {
        version: SETTINGS_VERSION,
        store_name: text(&["storeName", "store_name", "businessName"]).unwrap_or_default(),
        store_address: text(&["storeAddress", "address"]),
        store_phone: text(&["storePhone", "phone"]),
        currency_symbol: text(&["currencySymbol", "currency"]).unwrap_or(defaults.currency_symbol),
        date_format: text(&["dateFormat"])
            .map(|f| legacy_date_format(&f))
            .unwrap_or(defaults.date_format),
        stock_thresholds: StockThresholds {
            critical: number(&["criticalStockThreshold", "criticalStockLevel"])
                .unwrap_or(defaults.stock_thresholds.critical),
            minimum: number(&["lowStockThreshold", "minStockLevel", "minimumStock"])
                .unwrap_or(defaults.stock_thresholds.minimum),
        },
        near_expiry_days: number(&["expiryWarningDays", "nearExpiryDays"])
            .map(|d| d as i64)
            .unwrap_or(defaults.near_expiry_days),
        csv_mode,
        export_dir: None,
        api_base_url: text(&["apiUrl", "apiBaseUrl"]).unwrap_or_default(),
        request_timeout_secs: defaults.request_timeout_secs,
        invoice_footer: text(&["invoiceFooter", "receiptFooter"]),
    }
}

/// Maps the web client's `DD/MM/YYYY`-style tokens onto chrono patterns.
fn legacy_date_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    format
        .replace("YYYY", "%Y")
        .replace("MM", "%m")
        .replace("DD", "%d")
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `settings.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file gives defaults. A file that is not valid JSON is reported
    /// rather than silently replaced.
    pub fn load(&self) -> Result<Settings> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };
        let parsed: Value = serde_json::from_str(&raw)?;
        let was_legacy = parsed.get("version").is_none();
        let settings = migrate(parsed)?;
        if was_legacy {
            warn!(path = %self.path.display(), "Migrated unversioned settings document");
        }
        Ok(settings)
    }

    /// Writes to a sibling temp file and renames it over the target.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut doc = settings.clone();
        doc.version = SETTINGS_VERSION;
        let text = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), version = SETTINGS_VERSION, "Settings saved");
        Ok(())
    }
}
