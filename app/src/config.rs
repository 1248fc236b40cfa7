// Application Configuration

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use vigil_arming::ArmingConfig;
use vigil_hal::{SensorId, SensorInfo, SensorValue};
use vigil_sensors::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawAppConfig")]
pub struct AppConfig {
    /// Default journal session name
    #[serde(default = "default_session")]
    pub session_name: String,

    /// Directory holding journal sessions
    #[serde(default = "default_journal_dir")]
    pub journal_directory: String,

    /// Start a journal session on launch
    #[serde(default)]
    pub auto_record: bool,

    /// Alarm engine (sensor, class and group aggregation)
    #[serde(default)]
    pub engine: EngineConfig,

    /// Arming instances receiving the engine's payloads
    #[serde(default)]
    pub arming: Vec<ArmingConfig>,

    /// Sensors the in-memory host starts with
    #[serde(default)]
    pub sensors: Vec<SensorSeed>,

    /// Path to config file (for reference)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Arming or sensor entries dropped while decoding
    #[serde(skip)]
    pub load_issues: Vec<String>,
}

/// On-disk shape; arming and sensor entries are decoded one at a time
#[derive(Deserialize)]
struct RawAppConfig {
    #[serde(default = "default_session")]
    session_name: String,
    #[serde(default = "default_journal_dir")]
    journal_directory: String,
    #[serde(default)]
    auto_record: bool,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    arming: Vec<toml::Value>,
    #[serde(default)]
    sensors: Vec<toml::Value>,
}

impl From<RawAppConfig> for AppConfig {
    fn from(raw: RawAppConfig) -> Self {
        let mut load_issues = Vec::new();
        Self {
            session_name: raw.session_name,
            journal_directory: raw.journal_directory,
            auto_record: raw.auto_record,
            engine: raw.engine,
            arming: decode_entries("arming", raw.arming, &mut load_issues),
            sensors: decode_entries("sensors", raw.sensors, &mut load_issues),
            config_path: PathBuf::new(),
            load_issues,
        }
    }
}

fn decode_entries<T: DeserializeOwned>(section: &str, raw: Vec<toml::Value>, issues: &mut Vec<String>) -> Vec<T> {
    let mut entries = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        match value.try_into() {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("Config {}[{}] skipped: {}", section, index, e);
                issues.push(format!("{}[{}]: {} (skipped)", section, index, e));
            }
        }
    }
    entries
}

/// Sensor registered on the in-memory host at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSeed {
    pub id: SensorId,
    pub name: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub grandparent: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_initial")]
    pub initial: SensorValue,
}

impl SensorSeed {
    pub fn info(&self) -> SensorInfo {
        let mut info = SensorInfo::new(self.id, &self.name).with_location(&self.parent, &self.grandparent);
        if let Some(unit) = &self.unit {
            info = info.with_unit(unit);
        }
        info
    }
}

fn default_session() -> String { format!("session_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")) }
fn default_journal_dir() -> String { "/var/lib/vigil/journal".to_string() }
fn default_initial() -> SensorValue { SensorValue::Bool(false) }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_name: default_session(),
            journal_directory: default_journal_dir(),
            auto_record: false,
            engine: EngineConfig::default(),
            arming: Vec::new(),
            sensors: Vec::new(),
            config_path: PathBuf::new(),
            load_issues: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from standard paths
    pub fn load() -> Result<Self, ConfigError> {
        let config_paths = [
            PathBuf::from("/etc/vigil/config.toml"),
            dirs::config_dir()
                .map(|p| p.join("vigil/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("./config.toml"),
        ];

        for path in &config_paths {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        tracing::warn!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load an explicit path, or search the standard ones
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    /// Load configuration from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Everything that would be skipped, adjusted or ignored at startup
    pub fn check(&self) -> Vec<String> {
        let (snapshot, issues) = self.engine.compile();
        let mut problems: Vec<String> = issues.iter().map(|issue| format!("engine.{}", issue)).collect();
        problems.extend(self.load_issues.iter().cloned());

        let mut instances = HashSet::new();
        for (index, arming) in self.arming.iter().enumerate() {
            if let Err(e) = arming.validate() {
                problems.push(format!("arming[{}]: {}", index, e));
            }
            if !instances.insert(arming.instance_id) {
                problems.push(format!("arming[{}]: duplicate instance id {}", index, arming.instance_id));
            }
        }

        for target in snapshot.routing.targets() {
            if !instances.contains(&target.instance_id) {
                problems.push(format!(
                    "engine.targets: instance {} ('{}') has no arming instance, deliveries will fail",
                    target.instance_id, target.name
                ));
            }
        }

        let seeded: HashSet<SensorId> = self.sensors.iter().map(|s| s.id).collect();
        for id in snapshot.watched_sensors() {
            if !seeded.contains(&id) {
                problems.push(format!("sensors: sensor {} is referenced but not seeded", id));
            }
        }

        problems
    }

    pub fn arming_instance(&self, instance_id: u32) -> Option<&ArmingConfig> {
        self.arming.iter().find(|a| a.instance_id == instance_id)
    }
}

/// Annotated example configuration
pub const EXAMPLE: &str = r#"# Vigil Configuration File
#
# Copy this file to /etc/vigil/config.toml or ~/.config/vigil/config.toml

# Journal session name (auto-generated if not set)
session_name = "house_001"

# Directory holding journal sessions
journal_directory = "/var/lib/vigil/journal"

# Start a journal session on launch
auto_record = true

# Sensors known to the host: id, name, location and initial value
[[sensors]]
id = 101
name = "Front Door Lock"
parent = "Hallway"
grandparent = "Ground Floor"
initial = false

[[sensors]]
id = 102
name = "Front Door Contact"
parent = "Hallway"
grandparent = "Ground Floor"
initial = false

[[sensors]]
id = 103
name = "Hall PIR"
parent = "Hallway"
grandparent = "Ground Floor"
initial = false

[[sensors]]
id = 190
name = "Siren Lid"
parent = "Attic"
initial = false

[engine]
instance_id = 1
name = "Main House"
maintenance_mode = false

# Classes: logic is or | and | count; count uses threshold within time_window seconds
# label_mode is sensor_name | parent_location | formatted_value
[[engine.classes]]
id = "lock"
name = "Lock"
logic = "or"

[[engine.classes]]
id = "contact"
name = "Contact"
logic = "or"
label_mode = "parent_location"

[[engine.classes]]
id = "motion"
name = "Motion"
logic = "count"
threshold = 2
time_window = 10

# Sensor rules: operator is = | != | > | < | >= | <=
[[engine.sensors]]
sensor_id = 101
operator = "="
value = true
class_id = "lock"

[[engine.sensors]]
sensor_id = 102
operator = "="
value = true
class_id = "contact"

[[engine.sensors]]
sensor_id = 103
operator = "="
value = true
class_id = "motion"

# Tamper rules raise the sabotage flag; invert trips on false
[[engine.tamper]]
sensor_id = 190
invert = false

# Groups: logic is or | and
[[engine.groups]]
id = "entry"
name = "Entry"
logic = "or"

[[engine.groups]]
id = "interior"
name = "Interior"
logic = "or"

[[engine.group_members]]
group = "Entry"
class_id = "lock"

[[engine.group_members]]
group = "Entry"
class_id = "contact"

[[engine.group_members]]
group = "Interior"
class_id = "motion"

[[engine.targets]]
instance_id = 100
name = "Property State"

[[engine.routes]]
group = "Entry"
instance_id = 100

[[engine.routes]]
group = "Interior"
instance_id = 100

# Arming instances
[[arming]]
instance_id = 100
name = "Property State"

# Exit delay in minutes
arming_delay_minutes = 1

# State id that runs the exit-delay timer
exit_delay_state = 2

# keep_current | force_disarmed
on_illogical = "keep_current"

# Use the built-in matrix while decision_table is empty
fallback_matrix = false

[[arming.mapping]]
source_key = 101
role = "Front Door Lock"

[[arming.mapping]]
source_key = 102
role = "Front Door Contact"

# Bitmask -> state id; missing keys mean Disarmed (0), -1 marks illogical
# 0 Disarmed, 1 Intent, 2 Exit Delay, 3 Armed (External),
# 4 Armed (Internal), 5 Alarm Triggered, 6 Night
[arming.decision_table]
"3" = 1
"#;

/// Helper for getting config directories
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_parses_and_checks_clean() {
        let config = AppConfig::parse(EXAMPLE).unwrap();

        assert!(config.auto_record);
        assert_eq!(config.sensors.len(), 4);
        assert_eq!(config.engine.classes.len(), 3);
        assert_eq!(config.arming.len(), 1);
        assert_eq!(config.arming_instance(100).unwrap().mapping.len(), 2);
        assert_eq!(config.check(), Vec::<String>::new());
    }

    #[test]
    fn check_reports_unseeded_sensors_and_missing_arming() {
        let mut config = AppConfig::parse(EXAMPLE).unwrap();
        config.sensors.retain(|s| s.id != 103);
        config.arming.clear();

        let problems = config.check();
        assert!(problems.iter().any(|p| p.contains("sensor 103")));
        assert!(problems.iter().any(|p| p.contains("instance 100")));
    }

    #[test]
    fn malformed_entries_are_skipped_and_reported() {
        let raw = r#"
[[sensors]]
id = 101
name = "Front Door Lock"

[[sensors]]
id = "front"
name = "Broken Seed"

[[engine.classes]]
id = "lock"
name = "Lock"
logic = "or"

[[engine.classes]]
id = "broken"
name = "Broken"
logic = "xor"

[[engine.sensors]]
sensor_id = 101
operator = "="
value = true
class_id = "lock"

[[arming]]
instance_id = 100
on_illogical = "panic"

[[arming]]
instance_id = 200
"#;

        let config = AppConfig::parse(raw).unwrap();
        assert_eq!(config.sensors.len(), 1);
        assert_eq!(config.engine.classes.len(), 1);
        assert_eq!(config.arming.len(), 1);
        assert_eq!(config.arming[0].instance_id, 200);

        let problems = config.check();
        assert_eq!(problems.len(), 3, "{:?}", problems);
        assert!(problems[0].starts_with("engine.classes[1]"));
        assert!(problems.iter().any(|p| p.starts_with("sensors[1]")));
        assert!(problems.iter().any(|p| p.starts_with("arming[0]")));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.journal_directory, "/var/lib/vigil/journal");
        assert!(config.engine.classes.is_empty());
        assert!(config.check().is_empty());
    }
}
