//! Configuration loading from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Command-line flags override what is loaded here.
//!
//! ```toml
//! [input]
//! path = "location-history.json"
//! end = "2025-03-05"
//!
//! [clustering]
//! eps_meters = 50.0
//! min_samples = 5
//! min_visits = 6
//!
//! [places]
//! provider = "reverse_geocode"
//! dispatch_interval_ms = 500
//!
//! [classify]
//! night_start_hour = 22
//! night_end_hour = 6
//!
//! [output]
//! dir = "output"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::takeout::{parse_date_bound, DateRange};

/// Export location and time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: Option<PathBuf>,
    /// Inclusive lower bound (`YYYY-MM-DD` or RFC 3339)
    pub start: Option<String>,
    /// Exclusive upper bound (`YYYY-MM-DD` or RFC 3339)
    pub end: Option<String>,
}

impl InputConfig {
    pub fn date_range(&self) -> Result<DateRange> {
        Ok(DateRange {
            start: self.start.as_deref().map(parse_date_bound).transpose()?,
            end: self.end.as_deref().map(parse_date_bound).transpose()?,
        })
    }
}

/// DBSCAN and significance parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Neighbourhood radius in meters.
    /// Default: 50.0
    pub eps_meters: f64,

    /// Points (self included) needed within the radius for a core point.
    /// Default: 5
    pub min_samples: usize,

    /// Minimum visits for a cluster to count as significant.
    /// Default: 6
    pub min_visits: u32,

    /// Also cluster the start/end points of activities.
    /// Default: false
    pub include_activities: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            eps_meters: 50.0,
            min_samples: 5,
            min_visits: 6,
            include_activities: false,
        }
    }
}

/// Which lookup API to call per cluster centroid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacesProvider {
    /// Places Nearby Search: name and types of the closest place
    NearbySearch,
    /// Geocoding API: formatted address and point-of-interest name
    ReverseGeocode,
}

/// Place lookup client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacesConfig {
    pub provider: PlacesProvider,
    /// API root, overridable for proxies and tests
    pub base_url: String,
    /// Search radius for nearby search, meters
    pub radius_meters: u32,
    /// Gap between request starts
    pub dispatch_interval_ms: u64,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Inline key; prefer `api_key_env`
    pub api_key: Option<String>,
    /// Environment variable holding the key
    pub api_key_env: String,
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            provider: PlacesProvider::ReverseGeocode,
            base_url: "https://maps.googleapis.com/maps/api".to_string(),
            radius_meters: 50,
            dispatch_interval_ms: 500,
            max_concurrency: 4,
            max_retries: 3,
            timeout_secs: 30,
            api_key: None,
            api_key_env: "GOOGLE_PLACES_API_KEY".to_string(),
        }
    }
}

impl PlacesConfig {
    /// The configured key, falling back to the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty()))
    }
}

/// Home detection and classifier switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Local hour at which "night" starts (0-23)
    pub night_start_hour: u32,
    /// Local hour at which "night" ends (0-23)
    pub night_end_hour: u32,
    /// Share of overnight visits needed for the home heuristic
    pub home_night_fraction: f64,
    /// Trust the export's HOME/WORK semantic hints
    pub use_semantic_hints: bool,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            night_start_hour: 22,
            night_end_hour: 6,
            home_night_fraction: 0.5,
            use_semantic_hints: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("output") }
    }
}

/// Full run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub clustering: ClusterConfig,
    pub places: PlacesConfig,
    pub classify: ClassifyConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Load from `path` if given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.clustering;
        if !(c.eps_meters.is_finite() && c.eps_meters > 0.0) {
            return Err(Error::Config(format!("eps_meters must be positive, got {}", c.eps_meters)));
        }
        if c.min_samples == 0 {
            return Err(Error::Config("min_samples must be at least 1".to_string()));
        }
        let k = &self.classify;
        if k.night_start_hour > 23 || k.night_end_hour > 23 {
            return Err(Error::Config("night hours must be within 0-23".to_string()));
        }
        if !(0.0..=1.0).contains(&k.home_night_fraction) {
            return Err(Error::Config("home_night_fraction must be within 0-1".to_string()));
        }
        if self.places.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".to_string()));
        }
        self.input.date_range()?;
        Ok(())
    }
}
