//! Runtime configuration.
//!
//! Loaded from TOML. Every section carries `#[serde(default)]`, so a partial
//! file is merged over the built-in defaults. The app only reads config; it
//! never writes it back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "DASHTY_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crypto: CryptoConfig,
    pub stocks: StocksConfig,
    pub weather: WeatherConfig,
    pub pc: PcConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto: CryptoConfig::default(),
            stocks: StocksConfig::default(),
            weather: WeatherConfig::default(),
            pc: PcConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub default_symbol: String,
    pub default_timeframe: String,
    pub api_base: String,
    pub ws_base: String,
    pub fear_greed_api: String,
    pub dominance_api: String,
    pub heatmap_coins: Vec<String>,
    /// Symbol -> display name.
    pub symbols: BTreeMap<String, String>,
    pub refresh: CryptoRefresh,
    pub alerts: AlertConfig,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        let symbols = [
            ("BTCUSDT", "Bitcoin"),
            ("ETHUSDT", "Ethereum"),
            ("BNBUSDT", "BNB"),
            ("XRPUSDT", "XRP"),
            ("ADAUSDT", "Cardano"),
            ("DOGEUSDT", "Dogecoin"),
            ("SOLUSDT", "Solana"),
            ("DOTUSDT", "Polkadot"),
            ("MATICUSDT", "Polygon"),
            ("LTCUSDT", "Litecoin"),
        ]
        .into_iter()
        .map(|(s, n)| (s.to_string(), n.to_string()))
        .collect();

        Self {
            default_symbol: "BTCUSDT".to_string(),
            default_timeframe: "1m".to_string(),
            api_base: "https://api.binance.com".to_string(),
            ws_base: "wss://stream.binance.com:9443".to_string(),
            fear_greed_api: "https://api.alternative.me/fng/?limit=1".to_string(),
            dominance_api: "https://api.coingecko.com/api/v3/global".to_string(),
            heatmap_coins: [
                "BTCUSDT", "ETHUSDT", "BNBUSDT", "XRPUSDT", "SOLUSDT", "ADAUSDT", "DOGEUSDT",
                "TRXUSDT", "AVAXUSDT", "LINKUSDT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            symbols,
            refresh: CryptoRefresh::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl CryptoConfig {
    /// Symbols the user may switch to: the named set plus the heatmap coins.
    pub fn is_known_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol) || self.heatmap_coins.iter().any(|c| c == symbol)
    }

    pub fn display_name(&self, symbol: &str) -> String {
        self.symbols
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.trim_end_matches("USDT").to_string())
    }
}

/// Intervals in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoRefresh {
    pub ws_health_ms: u64,
    pub live_badge_ms: u64,
    pub pressure_decay_ms: u64,
    pub fgi_ms: u64,
    pub dominance_ms: u64,
    pub performance_ms: u64,
    pub heatmap_ms: u64,
    pub surface_refresh_ms: u64,
}

impl Default for CryptoRefresh {
    fn default() -> Self {
        Self {
            ws_health_ms: 15_000,
            live_badge_ms: 2_000,
            pressure_decay_ms: 5_000,
            fgi_ms: 300_000,
            dominance_ms: 300_000,
            performance_ms: 300_000,
            heatmap_ms: 30_000,
            surface_refresh_ms: 21_600_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub desktop: bool,
    pub audio: bool,
    pub history_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            desktop: true,
            audio: true,
            history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StocksConfig {
    pub api_base: String,
    pub default_ticker: String,
    pub allow_client_api_key: bool,
    pub api_key: String,
    pub heatmap_tickers: Vec<String>,
    pub refresh: StocksRefresh,
}

impl Default for StocksConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8888/api/stocks".to_string(),
            default_ticker: "AAPL".to_string(),
            allow_client_api_key: false,
            api_key: String::new(),
            heatmap_tickers: [
                "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "META", "TSLA", "AMD", "NFLX", "PLTR",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            refresh: StocksRefresh::default(),
        }
    }
}

impl StocksConfig {
    /// Configured heatmap tickers, trimmed and upper-cased, at most ten.
    pub fn heatmap_list(&self) -> Vec<String> {
        let list: Vec<String> = self
            .heatmap_tickers
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .take(10)
            .collect();
        if list.is_empty() {
            StocksConfig::default().heatmap_tickers
        } else {
            list
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StocksRefresh {
    pub snapshot_ms: u64,
    pub market_status_ms: u64,
    pub heatmap_ms: u64,
    pub bars_ms: u64,
}

impl Default for StocksRefresh {
    fn default() -> Self {
        Self {
            snapshot_ms: 10_000,
            market_status_ms: 30_000,
            heatmap_ms: 30_000,
            bars_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub api_base: String,
    pub api_fallback_bases: Vec<String>,
    pub refresh_ms: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            name: "Dundee, UK".to_string(),
            lat: 56.4620,
            lon: -2.9707,
            api_base: "https://api.open-meteo.com/v1/forecast".to_string(),
            api_fallback_bases: Vec::new(),
            refresh_ms: 600_000,
        }
    }
}

impl WeatherConfig {
    /// Primary base first, then fallbacks, without duplicates.
    pub fn bases(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for base in std::iter::once(&self.api_base).chain(self.api_fallback_bases.iter()) {
            let base = base.trim();
            if !base.is_empty() && !out.iter().any(|b| b == base) {
                out.push(base.to_string());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcConfig {
    pub endpoint: String,
    pub poll_ms: u64,
    pub debug: bool,
}

impl Default for PcConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8085/data.json".to_string(),
            poll_ms: 2_000,
            debug: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// First existing config file.
    ///
    /// Searches in order:
    /// 1. `$DASHTY_CONFIG`
    /// 2. `./dashty.toml`
    /// 3. `<config dir>/dashty/config.toml`
    pub fn locate() -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from("dashty.toml"));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("dashty").join("config.toml"));
        }
        candidates.into_iter().find(|p| p.is_file())
    }
}

/// Watches the located config file and reloads it when its mtime moves.
pub struct ConfigWatcher {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Locate and load. A broken file falls back to defaults and is logged.
    pub fn open() -> (Self, Config) {
        let path = Config::locate();
        let config = match &path {
            Some(p) => match Config::load(p) {
                Ok(config) => {
                    tracing::info!(path = %p.display(), "loaded config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "config unreadable, using defaults");
                    Config::default()
                }
            },
            None => Config::default(),
        };
        let modified = path.as_deref().and_then(mtime);
        (Self { path, modified }, config)
    }

    #[cfg(test)]
    pub fn at(path: PathBuf) -> Self {
        let modified = mtime(&path);
        Self {
            path: Some(path),
            modified,
        }
    }

    /// Returns a freshly loaded config if the file changed since the last look.
    pub fn poll(&mut self) -> Option<Config> {
        let path = self.path.as_ref()?;
        let current = mtime(path);
        if current == self.modified {
            return None;
        }
        self.modified = current;
        match Config::load(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "config changed, reloading");
                Some(config)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config reload failed");
                None
            }
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
