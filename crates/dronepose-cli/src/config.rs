//! Observer configuration – reads/writes `~/.dronepose/observer.toml`.
//!
//! Values are layered: file, then `DRONEPOSE_*` environment variables, then
//! command-line flags.  `loop_hz` has no default; if no layer supplies it
//! the observer refuses to start.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dronepose_perception::FramePair;
use dronepose_perception::publication::{DEFAULT_CHILD_FRAME, DEFAULT_PARENT_FRAME};
use dronepose_runtime::ObserverConfig;
use dronepose_types::PoseError;

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observer: ObserverSection,
}

/// The `[observer]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverSection {
    /// Fusion/publication rate in Hz.  Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_hz: Option<f64>,

    /// Use the range/altitude height instead of the ultrasonic sensor.
    #[serde(default)]
    pub simulation: bool,

    /// Positioning mode (0–6, 1 = GPS, 2 = GUIDANCE).
    #[serde(default = "default_positioning")]
    pub positioning: i64,

    /// Delay before subscribing to sensor input.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,

    #[serde(default = "default_parent_frame")]
    pub parent_frame: String,

    #[serde(default = "default_child_frame")]
    pub child_frame: String,

    /// Silence after which a source is reported stale.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

fn default_positioning() -> i64 {
    1
}
fn default_warmup_ms() -> u64 {
    1000
}
fn default_parent_frame() -> String {
    DEFAULT_PARENT_FRAME.to_string()
}
fn default_child_frame() -> String {
    DEFAULT_CHILD_FRAME.to_string()
}
fn default_stale_after_ms() -> u64 {
    500
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            loop_hz: None,
            simulation: false,
            positioning: default_positioning(),
            warmup_ms: default_warmup_ms(),
            parent_frame: default_parent_frame(),
            child_frame: default_child_frame(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

/// Values given on the command line; each one wins over file and env.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub loop_hz: Option<f64>,
    pub positioning: Option<i64>,
    pub simulation: Option<bool>,
}

impl Config {
    /// Apply `overrides` and turn the result into an [`ObserverConfig`].
    ///
    /// # Errors
    ///
    /// [`PoseError::MissingParameter`] when no layer set `loop_hz`;
    /// [`PoseError::InvalidParameter`] when the result fails validation.
    pub fn into_observer_config(mut self, overrides: &CliOverrides) -> Result<ObserverConfig, PoseError> {
        let section = &mut self.observer;
        if let Some(hz) = overrides.loop_hz {
            section.loop_hz = Some(hz);
        }
        if let Some(mode) = overrides.positioning {
            section.positioning = mode;
        }
        if let Some(sim) = overrides.simulation {
            section.simulation = sim;
        }

        let loop_hz = section
            .loop_hz
            .ok_or_else(|| PoseError::MissingParameter("loop_hz".to_string()))?;

        let config = ObserverConfig {
            loop_hz,
            positioning: section.positioning,
            simulation: section.simulation,
            warmup: Duration::from_millis(section.warmup_ms),
            frames: FramePair::new(section.parent_frame.clone(), section.child_frame.clone()),
            stale_after: Duration::from_millis(section.stale_after_ms),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Return the path to `~/.dronepose/observer.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".dronepose").join("observer.toml")
}

/// Load the config from `path` and apply environment overrides.
///
/// Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, PoseError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| PoseError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| PoseError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `DRONEPOSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `DRONEPOSE_LOOP_HZ` | `observer.loop_hz` |
/// | `DRONEPOSE_SIMULATION` | `observer.simulation` |
/// | `DRONEPOSE_POSITIONING` | `observer.positioning` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("DRONEPOSE_LOOP_HZ")
        && let Ok(hz) = v.trim().parse::<f64>()
    {
        cfg.observer.loop_hz = Some(hz);
    }
    if let Ok(v) = std::env::var("DRONEPOSE_SIMULATION")
        && let Some(sim) = parse_bool(&v)
    {
        cfg.observer.simulation = sim;
    }
    if let Ok(v) = std::env::var("DRONEPOSE_POSITIONING")
        && let Ok(mode) = v.trim().parse::<i64>()
    {
        cfg.observer.positioning = mode;
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Write `cfg` to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), PoseError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PoseError::Config(format!("failed to create {}: {e}", parent.display())))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PoseError::Config(format!("failed to serialise config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| PoseError::Config(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests share one lock: cargo runs tests on several threads.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("observer.toml");
        fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn config_path_points_to_dronepose_dir() {
        let p = config_path_for_home("/home/pilot");
        assert_eq!(p, PathBuf::from("/home/pilot/.dronepose/observer.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("absent.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn defaults_fill_unset_keys() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(&dir, "[observer]\nloop_hz = 50.0\n");

        let cfg = load_from(&path).unwrap().unwrap();
        let observer = cfg.into_observer_config(&CliOverrides::default()).unwrap();
        assert_eq!(observer.loop_hz, 50.0);
        assert_eq!(observer.positioning, 1);
        assert!(!observer.simulation);
        assert_eq!(observer.warmup, Duration::from_secs(1));
        assert_eq!(observer.stale_after, Duration::from_millis(500));
        assert_eq!(observer.frames, FramePair::new("world", "drone"));
    }

    #[test]
    fn missing_loop_hz_fails_fast() {
        let err = Config::default()
            .into_observer_config(&CliOverrides::default())
            .unwrap_err();
        assert_eq!(err, PoseError::MissingParameter("loop_hz".to_string()));
    }

    #[test]
    fn non_positive_loop_hz_is_rejected() {
        let overrides = CliOverrides {
            loop_hz: Some(0.0),
            ..CliOverrides::default()
        };
        let err = Config::default().into_observer_config(&overrides).unwrap_err();
        assert!(matches!(err, PoseError::InvalidParameter { .. }));
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(
            &dir,
            "[observer]\nloop_hz = 20.0\npositioning = 1\nsimulation = true\nchild_frame = \"uav\"\n",
        );
        let overrides = CliOverrides {
            loop_hz: Some(100.0),
            positioning: Some(2),
            simulation: Some(false),
        };
        let observer = load_from(&path)
            .unwrap()
            .unwrap()
            .into_observer_config(&overrides)
            .unwrap();
        assert_eq!(observer.loop_hz, 100.0);
        assert_eq!(observer.positioning, 2);
        assert!(!observer.simulation);
        assert_eq!(observer.frames.child, "uav");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(&dir, "[observer\nloop_hz = ");
        assert!(matches!(load_from(&path), Err(PoseError::Config(_))));
    }

    #[test]
    fn save_then_load_keeps_values() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.observer.loop_hz = Some(30.0);
        cfg.observer.positioning = 2;
        save_to(&cfg, &path).expect("save");

        assert_eq!(load_from(&path).unwrap(), Some(cfg));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let _env = ENV_LOCK.lock().unwrap();
        // SAFETY: ENV_LOCK serialises every test that reads these variables.
        unsafe {
            std::env::set_var("DRONEPOSE_LOOP_HZ", "25");
            std::env::set_var("DRONEPOSE_SIMULATION", "yes");
            std::env::set_var("DRONEPOSE_POSITIONING", "not-a-mode");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("DRONEPOSE_LOOP_HZ");
            std::env::remove_var("DRONEPOSE_SIMULATION");
            std::env::remove_var("DRONEPOSE_POSITIONING");
        }

        assert_eq!(cfg.observer.loop_hz, Some(25.0));
        assert!(cfg.observer.simulation);
        assert_eq!(cfg.observer.positioning, 1);
    }
}
