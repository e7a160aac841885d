//! Configuration Management

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Capture and perception loop settings
    #[serde(default)]
    pub perception: PerceptionConfig,
    /// Segmentation and classification settings
    #[serde(default)]
    pub decision: DecisionConfig,
    /// Model collection locations
    #[serde(default)]
    pub models: ModelsConfig,
    /// Robot link and task storage
    #[serde(default)]
    pub robot: RobotConfig,
    /// Class to task mapping
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Capture and perception loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// Frame channel capacity (frames)
    pub frame_channel_capacity: usize,
    /// Source frames skipped between two sampled frames
    pub skip_frames: u32,
    /// Pacing between source frames when replaying a recording (ms)
    pub replay_frame_interval_ms: u64,
    /// Poll interval of the worker loops (ms)
    pub poll_interval_ms: u64,
    /// Minimum interval between "waiting for both hands" logs (ms)
    pub hands_wait_log_interval_ms: u64,
    /// Liveness log interval (ms)
    pub heartbeat_interval_ms: u64,
    /// How long the supervisor waits for the model to become ready (ms)
    pub readiness_timeout_ms: u64,
    /// Calibration vectors (JSON); unit calibration when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_file: Option<PathBuf>,
}

/// Decision stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Segmentation window length (frames)
    pub segmentation_window: usize,
    /// Classification window length (frames)
    pub classification_window: usize,
    /// Timing window length W (segmentation samples)
    pub timing_window: usize,
    /// Transition fires when right_sum - left_sum > timing_threshold * W/2
    pub timing_threshold: f32,
    /// Ensemble probability above which a sample counts as static
    pub sample_threshold: f32,
}

/// Model collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory of segmentation `model_*.json` files
    pub segmentation_dir: PathBuf,
    /// Directory of classification `model_*.json` files
    pub classification_dir: PathBuf,
}

/// Robot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Robot controller address
    pub address: String,
    /// Directory holding one JSON record per task
    pub tasks_dir: PathBuf,
    /// Tool catalog file
    pub tools_file: PathBuf,
    /// How long the supervisor waits for the robot to come online (ms)
    pub robot_online_timeout_ms: u64,
}

/// One classifier label and the task it triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Classifier output index
    pub label: usize,
    /// Task name
    pub task: String,
    /// How many times the task runs per assembly
    pub instances: usize,
}

/// Ordering guard between two classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Label that may only dispatch once the paired label is nearly done
    pub terminal_label: usize,
    /// Label whose queue must be down to exactly one instance
    pub paired_label: usize,
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub classes: Vec<ClassConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardConfig>,
}

/// Root directory for cell data
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".cobot_cell"))
        .unwrap_or_else(|| PathBuf::from(".cobot_cell"))
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            frame_channel_capacity: 20,
            skip_frames: 2,
            replay_frame_interval_ms: 33,
            poll_interval_ms: 10,
            hands_wait_log_interval_ms: 4500,
            heartbeat_interval_ms: 5000,
            readiness_timeout_ms: 10_000,
            calibration_file: None,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            segmentation_window: 30,
            classification_window: 60,
            timing_window: 10,
            timing_threshold: 0.6,
            sample_threshold: 0.5,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let models = data_dir().join("models");
        Self {
            segmentation_dir: models.join("segmentation"),
            classification_dir: models.join("classification"),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            address: "172.31.1.147".to_string(),
            tasks_dir: data.join("tasks"),
            tools_file: data.join("tools.json"),
            robot_online_timeout_ms: 5000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let class = |label: usize, task: &str, instances: usize| ClassConfig {
            label,
            task: task.to_string(),
            instances,
        };
        Self {
            classes: vec![
                class(0, "base plate", 1),
                class(1, "gearbox", 1),
                class(2, "motor", 1),
                class(3, "axle", 1),
                class(4, "cover", 1),
                class(5, "wheel", 2),
            ],
            guard: Some(GuardConfig {
                terminal_label: 4,
                paired_label: 5,
            }),
        }
    }
}

impl DispatchConfig {
    /// Number of classifier outputs the classes cover
    pub fn class_count(&self) -> usize {
        self.classes.iter().map(|c| c.label + 1).max().unwrap_or(0)
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    /// Returns Ok(()) if valid, or Err with a description of the first invalid field.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.perception.frame_channel_capacity == 0 {
            return Err(crate::Error::Config(
                "frame_channel_capacity must be > 0".to_string(),
            ));
        }
        if self.perception.poll_interval_ms == 0 {
            return Err(crate::Error::Config("poll_interval_ms must be > 0".to_string()));
        }
        if self.decision.segmentation_window == 0 || self.decision.classification_window == 0 {
            return Err(crate::Error::Config(format!(
                "window lengths must be > 0, got segmentation {} classification {}",
                self.decision.segmentation_window, self.decision.classification_window
            )));
        }
        if self.decision.timing_window < 2 {
            return Err(crate::Error::Config(format!(
                "timing_window must be >= 2, got {}",
                self.decision.timing_window
            )));
        }
        if !(0.0..=1.0).contains(&self.decision.timing_threshold) {
            return Err(crate::Error::Config(format!(
                "timing_threshold must be in [0, 1], got {}",
                self.decision.timing_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.decision.sample_threshold) {
            return Err(crate::Error::Config(format!(
                "sample_threshold must be in [0, 1), got {}",
                self.decision.sample_threshold
            )));
        }
        if self.robot.address.parse::<std::net::IpAddr>().is_err() {
            return Err(crate::Error::Config(format!(
                "robot address must be an IP address, got {:?}",
                self.robot.address
            )));
        }
        self.validate_dispatch()
    }

    fn validate_dispatch(&self) -> Result<(), crate::Error> {
        let dispatch = &self.dispatch;
        if dispatch.classes.is_empty() {
            return Err(crate::Error::Config("dispatch needs at least one class".to_string()));
        }

        let mut labels = BTreeSet::new();
        for class in &dispatch.classes {
            if !labels.insert(class.label) {
                return Err(crate::Error::Config(format!(
                    "label {} is configured twice",
                    class.label
                )));
            }
            if class.instances == 0 {
                return Err(crate::Error::Config(format!(
                    "class {} must have at least one instance",
                    class.label
                )));
            }
            if class.task.trim().is_empty() {
                return Err(crate::Error::Config(format!(
                    "class {} has no task name",
                    class.label
                )));
            }
        }

        if let Some(guard) = &dispatch.guard {
            if guard.terminal_label == guard.paired_label {
                return Err(crate::Error::Config(
                    "guard terminal and paired labels must differ".to_string(),
                ));
            }
            for label in [guard.terminal_label, guard.paired_label] {
                if !labels.contains(&label) {
                    return Err(crate::Error::Config(format!(
                        "guard references unconfigured label {}",
                        label
                    )));
                }
            }
        }
        Ok(())
    }

    /// Load config from file
    pub fn load(path: &PathBuf) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from default location
    pub fn load_default() -> Result<Self, crate::Error> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &PathBuf) -> Result<(), crate::Error> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save to default location
    pub fn save_default(&self) -> Result<(), crate::Error> {
        self.save(&Self::default_path())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        data_dir().join("config.toml")
    }

    /// Generate TOML representation
    pub fn to_toml(&self) -> Result<String, crate::Error> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }

    fn to_value(&self) -> Result<toml::Value, crate::Error> {
        toml::Value::try_from(self).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Look up a value by dotted key, e.g. `decision.timing_window`
    pub fn get_value(&self, key: &str) -> Result<String, crate::Error> {
        let root = self.to_value()?;
        let found = key
            .split('.')
            .try_fold(&root, |value, part| value.get(part))
            .ok_or_else(|| crate::Error::Config(format!("unknown key {}", key)))?;

        Ok(match found {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Copy of this config with one dotted key replaced.
    ///
    /// The raw value is parsed as the type the key already has; the result
    /// must pass [`Config::validate`].
    pub fn with_value(&self, key: &str, raw: &str) -> Result<Self, crate::Error> {
        let unknown = || crate::Error::Config(format!("unknown key {}", key));
        let mut root = self.to_value()?;

        let (path, leaf) = match key.rsplit_once('.') {
            Some((path, leaf)) => (Some(path), leaf),
            None => (None, key),
        };
        let mut section = &mut root;
        for part in path.into_iter().flat_map(|p| p.split('.')) {
            section = section.get_mut(part).ok_or_else(unknown)?;
        }
        let table = section.as_table_mut().ok_or_else(unknown)?;
        let current = table.get(leaf).ok_or_else(unknown)?;
        let replacement = parse_like(current, raw)
            .ok_or_else(|| crate::Error::Config(format!("invalid value {:?} for {}", raw, key)))?;
        table.insert(leaf.to_string(), replacement);

        let config = root
            .try_into::<Config>()
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Parse `raw` as a value of the same TOML type as `current`
fn parse_like(current: &toml::Value, raw: &str) -> Option<toml::Value> {
    match current {
        toml::Value::String(_) => Some(toml::Value::String(raw.to_string())),
        toml::Value::Integer(_) => raw.parse().ok().map(toml::Value::Integer),
        toml::Value::Float(_) => raw.parse().ok().map(toml::Value::Float),
        toml::Value::Boolean(_) => raw.parse().ok().map(toml::Value::Boolean),
        _ => {
            let parsed: toml::Table = toml::from_str(&format!("value = {}", raw)).ok()?;
            parsed.get("value").cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.perception.frame_channel_capacity, 20);
        assert_eq!(config.decision.sample_threshold, 0.5);
        assert_eq!(config.robot.address, "172.31.1.147");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[perception]"));
        assert!(toml.contains("[decision]"));
        assert!(toml.contains("[models]"));
        assert!(toml.contains("[robot]"));
        assert!(toml.contains("[[dispatch.classes]]"));
        assert!(!toml.contains("calibration_file"));
    }

    #[test]
    fn test_default_path() {
        let path = Config::default_path();
        assert!(path.to_string_lossy().contains(".cobot_cell"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_dispatch_defaults() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.classes.len(), 6);
        assert_eq!(dispatch.class_count(), 6);
        let wheel = dispatch.classes.iter().find(|c| c.label == 5).unwrap();
        assert_eq!(wheel.instances, 2);
        assert_eq!(
            dispatch.guard,
            Some(GuardConfig {
                terminal_label: 4,
                paired_label: 5
            })
        );
    }

    #[test]
    fn test_config_roundtrip_serialization() {
        let mut original = Config::default();
        original.perception.calibration_file = Some(PathBuf::from("/tmp/calibration.json"));
        let toml_str = original.to_toml().unwrap();
        let deserialized: Config = toml::from_str(&toml_str).expect("Failed to deserialize");

        assert_eq!(original.decision.timing_window, deserialized.decision.timing_window);
        assert_eq!(original.dispatch.classes, deserialized.dispatch.classes);
        assert_eq!(original.dispatch.guard, deserialized.dispatch.guard);
        assert_eq!(
            deserialized.perception.calibration_file,
            Some(PathBuf::from("/tmp/calibration.json"))
        );
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.decision.timing_window = 12;
        original.robot.address = "10.0.0.5".to_string();
        original.dispatch.guard = None;

        original.save(&config_path).expect("Failed to save config");
        assert!(config_path.exists());

        let loaded = Config::load(&config_path).expect("Failed to load config");
        assert_eq!(loaded.decision.timing_window, 12);
        assert_eq!(loaded.robot.address, "10.0.0.5");
        assert!(loaded.dispatch.guard.is_none());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let result = Config::load(&temp_dir.path().join("missing.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_dispatch_section_uses_defaults() {
        let mut config = Config::default();
        let mut value: toml::Value = toml::from_str(&config.to_toml().unwrap()).unwrap();
        value.as_table_mut().unwrap().remove("dispatch");
        config = toml::from_str(&toml::to_string(&value).unwrap())
            .expect("Config without [dispatch] should deserialize");
        assert_eq!(config.dispatch.classes.len(), 6);
    }

    #[test]
    fn test_partial_config_fills_in_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[decision]\ntiming_window = 12\n").unwrap();

        let config = Config::load(&path).expect("Partial config should load");
        let defaults = Config::default();
        assert_eq!(config.decision.timing_window, 12);
        assert_eq!(
            config.decision.segmentation_window,
            defaults.decision.segmentation_window
        );
        assert_eq!(config.decision.timing_threshold, defaults.decision.timing_threshold);
        assert_eq!(config.perception.skip_frames, defaults.perception.skip_frames);
        assert_eq!(config.models.segmentation_dir, defaults.models.segmentation_dir);
        assert_eq!(config.robot.address, defaults.robot.address);
        assert_eq!(config.dispatch.classes.len(), 6);

        let empty: Config = toml::from_str("").expect("Empty config should deserialize");
        assert_eq!(empty.robot.tasks_dir, defaults.robot.tasks_dir);
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = Config::default();
        config.perception.frame_channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decision.timing_window = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decision.timing_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.decision.segmentation_window = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.robot.address = "robot.local".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_dispatch() {
        let mut config = Config::default();
        config.dispatch.classes[1].label = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.classes[0].instances = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.guard = Some(GuardConfig {
            terminal_label: 4,
            paired_label: 9,
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.classes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_invalid_values() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("bad_config.toml");

        let mut config = Config::default();
        config.decision.timing_threshold = 3.0;
        std::fs::write(&config_path, config.to_toml().unwrap()).expect("Failed to write config");

        assert!(Config::load(&config_path).is_err());
    }

    #[test]
    fn test_get_value() {
        let config = Config::default();
        assert_eq!(config.get_value("decision.timing_window").unwrap(), "10");
        assert_eq!(config.get_value("robot.address").unwrap(), "172.31.1.147");
        assert_eq!(config.get_value("dispatch.guard.paired_label").unwrap(), "5");
        assert!(config.get_value("decision.nothing").is_err());
    }

    #[test]
    fn test_with_value() {
        let config = Config::default();

        let updated = config.with_value("decision.timing_window", "12").unwrap();
        assert_eq!(updated.decision.timing_window, 12);

        let updated = config.with_value("decision.timing_threshold", "0.75").unwrap();
        assert_eq!(updated.decision.timing_threshold, 0.75);

        let updated = config.with_value("robot.address", "10.1.1.2").unwrap();
        assert_eq!(updated.robot.address, "10.1.1.2");

        assert!(config.with_value("decision.timing_window", "many").is_err());
        assert!(config.with_value("decision.timing_window", "1").is_err());
        assert!(config.with_value("robot.speed", "3").is_err());
        assert!(config.with_value("robot.address", "robot.local").is_err());
    }

    #[test]
    fn test_invalid_toml_parsing() {
        let result: Result<Config, _> = toml::from_str("this is not valid toml {{{}}}");
        assert!(result.is_err());
    }
}
