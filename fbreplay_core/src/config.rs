use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_flash_poll_interval_ms")]
    pub flash_poll_interval_ms: u64,
    #[serde(default = "default_flash_poll_limit")]
    pub flash_poll_limit: u32,
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_flash_poll_interval_ms() -> u64 {
    1000
}

fn default_flash_poll_limit() -> u32 {
    10
}

impl EngineSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn flash_poll_interval(&self) -> Duration {
        Duration::from_millis(self.flash_poll_interval_ms)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            backoff_ms: default_backoff_ms(),
            flash_poll_interval_ms: default_flash_poll_interval_ms(),
            flash_poll_limit: default_flash_poll_limit(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FlashFuzzSettings {
    #[serde(default = "default_flash_fuzz_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_flash_fuzz_enabled() -> bool {
    true
}

impl Default for FlashFuzzSettings {
    fn default() -> Self {
        Self {
            enabled: default_flash_fuzz_enabled(),
            seed: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPolicy {
    #[default]
    Prompt,
    Active,
    Passive,
}

impl RecoveryPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            RecoveryPolicy::Prompt => "prompt",
            RecoveryPolicy::Active => "active",
            RecoveryPolicy::Passive => "passive",
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RecoverySettings {
    #[serde(default)]
    pub mode: RecoveryPolicy,
    #[serde(default = "default_reboot_target")]
    pub reboot_target: String,
}

pub fn default_reboot_target() -> String {
    "bootloader".to_string()
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            mode: RecoveryPolicy::default(),
            reboot_target: default_reboot_target(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ObserverSettings {
    #[serde(default = "default_quiet_messages")]
    pub quiet_messages: Vec<String>,
}

pub fn default_quiet_messages() -> Vec<String> {
    vec!["invalid command".to_string()]
}

impl ObserverSettings {
    pub fn quiet_message_bytes(&self) -> Vec<Vec<u8>> {
        self.quiet_messages
            .iter()
            .map(|m| m.as_bytes().to_vec())
            .collect()
    }
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            quiet_messages: default_quiet_messages(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReplayConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub flash_fuzz: FlashFuzzSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub observer: ObserverSettings,
}

impl ReplayConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: ReplayConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_the_replay_timings() {
        let config = ReplayConfig::default();
        assert_eq!(config.engine.command_timeout(), Duration::from_millis(1000));
        assert_eq!(config.engine.backoff(), Duration::from_secs(1));
        assert_eq!(config.engine.flash_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.engine.flash_poll_limit, 10);
        assert!(config.flash_fuzz.enabled);
        assert_eq!(config.recovery.mode, RecoveryPolicy::Prompt);
        assert_eq!(config.recovery.reboot_target, "bootloader");
        assert_eq!(
            config.observer.quiet_message_bytes(),
            vec![b"invalid command".to_vec()]
        );
    }

    #[test]
    fn empty_file_gives_defaults() {
        let file = write_config("");
        let config = ReplayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.engine.command_timeout_ms, 1000);
        assert!(config.flash_fuzz.seed.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let file = write_config(
            r#"
[engine]
backoff-ms = 250

[flash-fuzz]
enabled = false
seed = 1234

[recovery]
mode = "passive"

[observer]
quiet-messages = ["invalid command", "unknown variable"]
"#,
        );
        let config = ReplayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.engine.backoff_ms, 250);
        assert_eq!(config.engine.command_timeout_ms, 1000);
        assert!(!config.flash_fuzz.enabled);
        assert_eq!(config.flash_fuzz.seed, Some(1234));
        assert_eq!(config.recovery.mode, RecoveryPolicy::Passive);
        assert_eq!(config.recovery.reboot_target, "bootloader");
        assert_eq!(config.observer.quiet_messages.len(), 2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[engine]\nretries = 3\n");
        let err = ReplayConfig::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML"), "{err}");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err =
            ReplayConfig::load_from_file(Path::new("/nonexistent/fbreplay.toml")).unwrap_err();
        assert!(err.to_string().contains("fbreplay.toml"), "{err}");
    }
}
