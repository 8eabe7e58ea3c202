// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and key is optional. A missing file means defaults; a broken
// file is reported and also means defaults.
//
// Loading happens before the logger exists (the file picks the log level),
// so nothing here logs while reading; the caller reports the outcome.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound for `graphics.max_frames_in_flight`
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan".to_string(),
            width: 800,
            height: 600,
            resizable: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when the surface lacks it
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.07, 0.47, 0.95, 1.0],
            max_frames_in_flight: 1,
        }
    }
}

/// Precompiled SPIR-V locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("assets/shaders/bytecodes/vert_bare.spv"),
            fragment: PathBuf::from("assets/shaders/bytecodes/frag_bare.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: false,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(Some(config))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Get the preferred present mode as Vulkan enum
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Validation layers are a debug-build feature only
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// `max_frames_in_flight`, kept within `1..=MAX_FRAMES_IN_FLIGHT`
    pub fn frames_in_flight(&self) -> usize {
        self.graphics
            .max_frames_in_flight
            .clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.title, "Vulkan");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(!config.window.resizable);
        assert_eq!(config.graphics.clear_color, [0.07, 0.47, 0.95, 1.0]);
        assert_eq!(config.frames_in_flight(), 1);
        assert_eq!(
            config.shaders.vertex,
            PathBuf::from("assets/shaders/bytecodes/vert_bare.spv")
        );
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1024
            resizable = true

            [graphics]
            present_mode = "FIFO_RELAXED"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert!(config.window.resizable);
        assert_eq!(
            config.preferred_present_mode(),
            vk::PresentModeKHR::FIFO_RELAXED
        );
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::from_toml_str("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let config = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn huge_frames_in_flight_is_capped() {
        let config =
            Config::from_toml_str("[graphics]\nmax_frames_in_flight = 100000").unwrap();
        assert_eq!(config.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);

        let config = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 3").unwrap();
        assert_eq!(config.frames_in_flight(), 3);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let loaded = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn existing_file_is_read() {
        let path = std::env::temp_dir()
            .join(format!("hello-triangle-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\ntitle = \"Triangle\"\n").unwrap();

        let loaded = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap().expect("file exists");
        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let config = Config::load_from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"))
            .unwrap()
            .expect("config.toml ships with the crate");
        let defaults = Config::default();

        assert_eq!(config.window.title, defaults.window.title);
        assert_eq!(config.graphics.present_mode, defaults.graphics.present_mode);
        assert_eq!(config.graphics.clear_color, defaults.graphics.clear_color);
        assert_eq!(config.shaders.vertex, defaults.shaders.vertex);
        assert_eq!(config.shaders.fragment, defaults.shaders.fragment);
    }
}
