use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which enrolled embeddings a verification is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// Only the claimed identity's embedding (targeted load).
    Claimed,
    /// Every enrolled embedding; the nearest must be the claimed identity.
    Gallery,
}

impl FromStr for MatchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claimed" => Ok(Self::Claimed),
            "gallery" => Ok(Self::Gallery),
            other => Err(format!("unknown match scope {other:?}")),
        }
    }
}

impl MatchScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Gallery => "gallery",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    System,
    Session,
}

impl FromStr for Bus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown bus {other:?}")),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Reference photo directory imported at startup, if set.
    pub reference_dir: Option<PathBuf>,
    /// Euclidean tolerance override; the model's calibrated value otherwise.
    pub tolerance: Option<f32>,
    pub extract_timeout: Duration,
    /// Number of extraction worker threads.
    pub workers: usize,
    /// Largest accepted image upload in bytes.
    pub max_image_bytes: usize,
    pub match_scope: MatchScope,
    pub bus: Bus,
}

const DEFAULT_EXTRACT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            model_dir: lookup("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models")),
            db_path: lookup("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("rollcall.db")),
            reference_dir: lookup("ROLLCALL_REFERENCE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            tolerance: parsed::<f32>(&lookup, "ROLLCALL_TOLERANCE")
                .filter(|t| t.is_finite() && *t > 0.0),
            extract_timeout: Duration::from_millis(
                parsed::<u64>(&lookup, "ROLLCALL_EXTRACT_TIMEOUT_MS")
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_EXTRACT_TIMEOUT_MS),
            ),
            workers: parsed::<usize>(&lookup, "ROLLCALL_WORKERS")
                .filter(|n| *n > 0)
                .unwrap_or(default_workers),
            max_image_bytes: parsed::<usize>(&lookup, "ROLLCALL_MAX_IMAGE_BYTES")
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            match_scope: parsed(&lookup, "ROLLCALL_MATCH_SCOPE").unwrap_or(MatchScope::Claimed),
            bus: parsed(&lookup, "ROLLCALL_BUS").unwrap_or(Bus::System),
        }
    }
}

/// Parse `key` if set; unparseable values are logged and ignored.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
