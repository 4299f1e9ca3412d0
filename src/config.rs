// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and key is optional. A missing file means defaults, a broken
// file is reported and also falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound on `graphics.frame_overlap`
pub const MAX_FRAME_OVERLAP: usize = 16;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
    pub logging: LoggingConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Must stay false; resizing would invalidate the swapchain
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hello Triangle".to_string(),
            width: 854,
            height: 480,
            resizable: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Number of frames that may be in flight at once
    pub frame_overlap: usize,
    /// Upper bound on a frame fence wait. `None` waits forever.
    pub fence_timeout_ns: Option<u64>,
    pub acquire_timeout_ns: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [1.0, 0.3, 1.0, 1.0],
            frame_overlap: 2,
            fence_timeout_ns: None,
            acquire_timeout_ns: 1_000_000_000,
        }
    }
}

impl GraphicsConfig {
    /// Fence timeout in the form `vkWaitForFences` expects
    pub fn fence_timeout(&self) -> u64 {
        self.fence_timeout_ns.unwrap_or(u64::MAX)
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
        }
    }
}

/// Logging settings, handed to `init_logging` once at startup
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// env_logger filter directives, e.g. `"info"` or `"warn,application=debug"`
    pub level: String,
    pub log_to_file: bool,
    pub log_file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: PathBuf::from("hello_triangle.log"),
        }
    }
}

impl Config {
    /// Load configuration from config.toml, falling back to defaults.
    ///
    /// Runs before the logger exists, so problems are returned alongside the
    /// config and logged by the caller once logging is up.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path("config.toml") {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;

        let overlap = config.graphics.frame_overlap;
        if !(1..=MAX_FRAME_OVERLAP).contains(&overlap) {
            anyhow::bail!(
                "graphics.frame_overlap must be between 1 and {}, got {}",
                MAX_FRAME_OVERLAP,
                overlap
            );
        }

        // The swapchain is built once and never recreated
        if config.window.resizable {
            anyhow::bail!("window.resizable is not supported");
        }

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.window.title, "Hello Triangle");
        assert_eq!((config.window.width, config.window.height), (854, 480));
        assert!(!config.window.resizable);
        assert_eq!(config.graphics.frame_overlap, 2);
        assert_eq!(config.graphics.fence_timeout(), u64::MAX);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            frame_overlap = 3
            fence_timeout_ns = 500

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.frame_overlap, 3);
        assert_eq!(config.graphics.fence_timeout(), 500);
        assert_eq!(config.graphics.present_mode, "fifo");
        assert_eq!(config.graphics.clear_color, [1.0, 0.3, 1.0, 1.0]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
    }

    #[test]
    fn test_zero_frame_overlap_is_rejected() {
        let err = Config::parse("[graphics]\nframe_overlap = 0\n").unwrap_err();
        assert!(err.to_string().contains("frame_overlap"));
    }

    #[test]
    fn test_oversized_frame_overlap_is_rejected() {
        let err = Config::parse("[graphics]\nframe_overlap = 4294967295\n").unwrap_err();
        assert!(err.to_string().contains("frame_overlap"));

        let err = Config::parse("[graphics]\nframe_overlap = 17\n").unwrap_err();
        assert!(err.to_string().contains("between 1 and 16"));

        let config = Config::parse("[graphics]\nframe_overlap = 16\n").unwrap();
        assert_eq!(config.graphics.frame_overlap, MAX_FRAME_OVERLAP);
    }

    #[test]
    fn test_resizable_window_is_rejected() {
        let err = Config::parse("[window]\nresizable = true\n").unwrap_err();
        assert!(err.to_string().contains("resizable"));

        assert!(Config::parse("[window]\nresizable = false\n").is_ok());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("[window\ntitle = 3").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config.graphics.acquire_timeout_ns, 1_000_000_000);
    }

    #[test]
    fn test_present_mode_mapping() {
        let mut config = Config::default();
        config.graphics.present_mode = "Mailbox".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "vsync-please".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }
}
