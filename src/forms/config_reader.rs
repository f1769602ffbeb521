use crate::forms::*;

use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "data_store";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;

pub const DEFAULT_NAME_HINTS: &[&str] = &["name", "member", "student", "respondent"];
pub const DEFAULT_CONTACT_HINTS: &[&str] = &["contact", "phone", "mobile", "whatsapp", "email"];

/// The optional JSON configuration file.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormsConfig {
    /// Where the schemas, responses and rosters are kept. Relative paths are resolved
    /// against the directory of the configuration file.
    #[serde(rename = "dataDirectory")]
    pub data_directory: Option<String>,
    #[serde(rename = "lockTimeoutMs")]
    pub lock_timeout_ms: Option<u64>,
    #[serde(rename = "headerDetection")]
    pub header_detection: Option<HeaderThreshold>,
    #[serde(rename = "rosterNameHints")]
    pub roster_name_hints: Option<Vec<String>>,
    #[serde(rename = "rosterContactHints")]
    pub roster_contact_hints: Option<Vec<String>>,
}

/// The resolved settings, with every default applied.
#[derive(PartialEq, Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
    pub header: HeaderThreshold,
    pub name_hints: Vec<String>,
    pub contact_hints: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            header: HeaderThreshold::DEFAULT,
            name_hints: DEFAULT_NAME_HINTS.iter().map(|s| s.to_string()).collect(),
            contact_hints: DEFAULT_CONTACT_HINTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Settings {
    pub fn in_dir(data_dir: &Path) -> Settings {
        Settings {
            data_dir: data_dir.to_path_buf(),
            ..Settings::default()
        }
    }

    pub fn from_config(cfg: &FormsConfig, config_dir: Option<&Path>) -> Settings {
        let defaults = Settings::default();
        let data_dir = match (&cfg.data_directory, config_dir) {
            (Some(d), Some(base)) if Path::new(d).is_relative() => base.join(d),
            (Some(d), _) => PathBuf::from(d),
            (None, _) => defaults.data_dir,
        };
        let hints = |h: &Option<Vec<String>>, default: Vec<String>| match h {
            Some(v) if !v.is_empty() => v.iter().map(|s| s.to_lowercase()).collect(),
            _ => default,
        };
        Settings {
            data_dir,
            lock_timeout: cfg
                .lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            header: cfg.header_detection.unwrap_or(defaults.header),
            name_hints: hints(&cfg.roster_name_hints, defaults.name_hints),
            contact_hints: hints(&cfg.roster_contact_hints, defaults.contact_hints),
        }
    }
}

pub fn read_config(path: &Path) -> FormsResult<FormsConfig> {
    let contents = fs::read_to_string(path).context(IoSnafu {
        path: path.display().to_string(),
    })?;
    let cfg: FormsConfig = serde_json::from_str(&contents).context(ParsingJsonSnafu {
        path: path.display().to_string(),
    })?;
    Ok(cfg)
}
