//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/facegate.toml
//!
//! Every section is optional; missing keys take the defaults below.

use crate::domain::types::Level;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that supplies the face service key when the file leaves it empty
pub const FACE_API_KEY_ENV: &str = "FACE_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// Root of the sysfs GPIO tree
    pub sysfs_root: String,
    pub button_pin: u32,
    pub lock_pin: u32,
    pub servo_pin: u32,
    /// Button pulls the line low when pushed
    pub button_active_low: bool,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    /// Lock pin level that releases the door
    pub lock_unlocked_level: Level,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: "/sys/class/gpio".to_string(),
            button_pin: 5,
            lock_pin: 4,
            servo_pin: 18,
            button_active_low: true,
            debounce_ms: 25,
            poll_interval_ms: 2,
            lock_unlocked_level: Level::High,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    /// Seconds the door stays unlocked
    pub hold_secs: u64,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self { hold_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    pub open_high_us: u64,
    pub open_low_us: u64,
    pub closed_high_us: u64,
    pub closed_low_us: u64,
    pub window_ms: u64,
    /// Delay before the first pulse of every train
    pub settle_ms: u64,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            open_high_us: 2000,
            open_low_us: 18000,
            closed_high_us: 1000,
            closed_low_us: 19000,
            window_ms: 300,
            settle_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Base URL including the API version path, e.g. https://<name>.cognitiveservices.azure.com/face/v1.0
    pub endpoint: String,
    pub subscription_key: String,
    /// Group id written to the group store on first run
    pub person_group_id: String,
    pub timeout_ms: u64,
    pub data_dir: String,
    pub group_id_file: String,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8090/face/v1.0".to_string(),
            subscription_key: String::new(),
            person_group_id: "visitors".to_string(),
            timeout_ms: 10_000,
            data_dir: "data".to_string(),
            group_id_file: "WhiteListId.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture command; `{path}` is replaced with the output file
    pub command: Vec<String>,
    pub capture_dir: String,
    /// File extension of captured stills
    pub extension: String,
    /// Serve this file instead of running the capture command
    pub still_file: Option<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "fswebcam".to_string(),
                "--no-banner".to_string(),
                "-r".to_string(),
                "1280x720".to_string(),
                "{path}".to_string(),
            ],
            capture_dir: "/tmp/facegate".to_string(),
            extension: "jpg".to_string(),
            still_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Synthesis command; `{text}` is replaced with the message
    pub command: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self { enabled: true, command: vec!["espeak".to_string(), "{text}".to_string()] }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    pub greeting: String,
    pub ready: String,
    pub not_recognized: String,
    pub no_camera: String,
    /// `{name}` is replaced with the visitor name
    pub welcome: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            greeting: "Facial recognition door.".to_string(),
            ready: "The door is ready.".to_string(),
            not_recognized: "Sorry. I don't recognize you.".to_string(),
            no_camera: "Your camera has not been initialized.".to_string(),
            welcome: "Welcome {name}. I will open the door.".to_string(),
        }
    }
}

impl MessagesConfig {
    pub fn welcome_for(&self, name: &str) -> String {
        self.welcome.replace("{name}", name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Control/metrics HTTP port (0 to disable)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub gpio: GpioConfig,
    pub door: DoorConfig,
    pub pwm: PwmConfig,
    pub face: FaceConfig,
    pub camera: CameraConfig,
    pub speech: SpeechConfig,
    pub messages: MessagesConfig,
    pub http: HttpConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    gpio_sysfs_root: String,
    button_pin: u32,
    lock_pin: u32,
    servo_pin: u32,
    button_active_low: bool,
    debounce_ms: u64,
    button_poll_interval_ms: u64,
    lock_unlocked_level: Level,
    door_hold_secs: u64,
    pwm: PwmConfig,
    face_endpoint: String,
    face_subscription_key: String,
    person_group_id: String,
    face_timeout_ms: u64,
    data_dir: String,
    group_id_file: String,
    camera_command: Vec<String>,
    camera_capture_dir: String,
    camera_extension: String,
    camera_still_file: Option<String>,
    speech_enabled: bool,
    speech_command: Vec<String>,
    messages: MessagesConfig,
    http_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let subscription_key = if toml_config.face.subscription_key.is_empty() {
            env::var(FACE_API_KEY_ENV).unwrap_or_default()
        } else {
            toml_config.face.subscription_key
        };

        Self {
            gpio_sysfs_root: toml_config.gpio.sysfs_root,
            button_pin: toml_config.gpio.button_pin,
            lock_pin: toml_config.gpio.lock_pin,
            servo_pin: toml_config.gpio.servo_pin,
            button_active_low: toml_config.gpio.button_active_low,
            debounce_ms: toml_config.gpio.debounce_ms,
            button_poll_interval_ms: toml_config.gpio.poll_interval_ms,
            lock_unlocked_level: toml_config.gpio.lock_unlocked_level,
            door_hold_secs: toml_config.door.hold_secs,
            pwm: toml_config.pwm,
            face_endpoint: toml_config.face.endpoint.trim_end_matches('/').to_string(),
            face_subscription_key: subscription_key,
            person_group_id: toml_config.face.person_group_id,
            face_timeout_ms: toml_config.face.timeout_ms,
            data_dir: toml_config.face.data_dir,
            group_id_file: toml_config.face.group_id_file,
            camera_command: toml_config.camera.command,
            camera_capture_dir: toml_config.camera.capture_dir,
            camera_extension: toml_config.camera.extension,
            camera_still_file: toml_config.camera.still_file,
            speech_enabled: toml_config.speech.enabled,
            speech_command: toml_config.speech.command,
            messages: toml_config.messages,
            http_port: toml_config.http.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/facegate.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, config_file: String) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        Ok(Self::from_toml(toml_config, config_file))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Render the welcome message for a visitor
    pub fn welcome_message(&self, name: &str) -> String {
        self.messages.welcome_for(name)
    }

    // Getters for all config fields
    pub fn gpio_sysfs_root(&self) -> &str {
        &self.gpio_sysfs_root
    }

    pub fn button_pin(&self) -> u32 {
        self.button_pin
    }

    pub fn lock_pin(&self) -> u32 {
        self.lock_pin
    }

    pub fn servo_pin(&self) -> u32 {
        self.servo_pin
    }

    pub fn button_active_low(&self) -> bool {
        self.button_active_low
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn button_poll_interval_ms(&self) -> u64 {
        self.button_poll_interval_ms
    }

    pub fn lock_unlocked_level(&self) -> Level {
        self.lock_unlocked_level
    }

    pub fn door_hold_secs(&self) -> u64 {
        self.door_hold_secs
    }

    pub fn pwm(&self) -> &PwmConfig {
        &self.pwm
    }

    pub fn face_endpoint(&self) -> &str {
        &self.face_endpoint
    }

    pub fn face_subscription_key(&self) -> &str {
        &self.face_subscription_key
    }

    pub fn person_group_id(&self) -> &str {
        &self.person_group_id
    }

    pub fn face_timeout_ms(&self) -> u64 {
        self.face_timeout_ms
    }

    /// Full path of the persisted visitor-group id
    pub fn group_id_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.group_id_file)
    }

    pub fn camera_command(&self) -> &[String] {
        &self.camera_command
    }

    pub fn camera_capture_dir(&self) -> &str {
        &self.camera_capture_dir
    }

    pub fn camera_extension(&self) -> &str {
        &self.camera_extension
    }

    pub fn camera_still_file(&self) -> Option<&str> {
        self.camera_still_file.as_deref()
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech_enabled
    }

    pub fn speech_command(&self) -> &[String] {
        &self.speech_command
    }

    pub fn messages(&self) -> &MessagesConfig {
        &self.messages
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.button_pin(), 5);
        assert_eq!(config.lock_pin(), 4);
        assert_eq!(config.servo_pin(), 18);
        assert_eq!(config.debounce_ms(), 25);
        assert_eq!(config.door_hold_secs(), 10);
        assert_eq!(config.pwm().window_ms, 300);
        assert_eq!(config.lock_unlocked_level(), Level::High);
        assert!(config.button_active_low());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["facegate".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/facegate.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["facegate".to_string(), "--config".to_string(), "config/porch.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/porch.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["facegate".to_string(), "--config=config/garage.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/garage.toml");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            "[door]\nhold_secs = 3\n\n[gpio]\nlock_unlocked_level = \"low\"\n",
            "inline".to_string(),
        )
        .unwrap();
        assert_eq!(config.door_hold_secs(), 3);
        assert_eq!(config.lock_unlocked_level(), Level::Low);
        assert_eq!(config.button_pin(), 5);
        assert_eq!(config.messages().not_recognized, "Sorry. I don't recognize you.");
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let config = Config::from_toml_str(
            "[face]\nendpoint = \"https://door.cognitiveservices.azure.com/face/v1.0/\"\n",
            "inline".to_string(),
        )
        .unwrap();
        assert_eq!(config.face_endpoint(), "https://door.cognitiveservices.azure.com/face/v1.0");
    }

    #[test]
    fn test_welcome_message() {
        let config = Config::default();
        assert_eq!(config.welcome_message("Alice"), "Welcome Alice. I will open the door.");
    }

    #[test]
    fn test_group_id_path() {
        let config = Config::default();
        assert_eq!(config.group_id_path(), Path::new("data").join("WhiteListId.txt"));
    }
}
