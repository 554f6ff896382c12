use crate::enums::{Interpolation, SortBy};
use crate::overlay::OverlayStyle;

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Navigator settings. Every field is optional in the YAML form.
///
/// ```yaml
/// default_window: 400
/// default_level: 40
/// overlay:
///   alpha: 0.5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    /// Window width every view starts with after a volume is opened.
    pub default_window: f64,
    pub default_level: f64,
    /// Smallest accepted window width; narrower requests are raised to it.
    pub min_window: f64,
    pub sort_by: SortBy,
    pub overlay: OverlayStyle,
    /// How snapshot surfaces scale slices with anisotropic voxels.
    pub interpolation: Interpolation,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            default_window: 2000.0,
            default_level: 40.0,
            min_window: 1.0,
            sort_by: SortBy::default(),
            overlay: OverlayStyle::default(),
            interpolation: Interpolation::default(),
        }
    }
}

impl NavigatorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let config = NavigatorConfig::from_yaml_str("default_window: 400\n").expect("valid yaml");
        assert_eq!(config.default_window, 400.0);
        assert_eq!(config.default_level, 40.0);
        assert_eq!(config.overlay, OverlayStyle::default());
    }

    #[test]
    fn nested_overlay_style_is_read() {
        let yaml = "overlay:\n  alpha: 0.5\n  palette: [[1, 2, 3]]\nsort_by: InstanceNumber\n";
        let config = NavigatorConfig::from_yaml_str(yaml).expect("valid yaml");
        assert_eq!(config.overlay.alpha, 0.5);
        assert_eq!(config.overlay.palette, vec![[1, 2, 3]]);
        assert_eq!(config.sort_by, SortBy::InstanceNumber);
    }

    #[test]
    fn interpolation_defaults_to_none() {
        assert_eq!(NavigatorConfig::default().interpolation, Interpolation::None);
        let config = NavigatorConfig::from_yaml_str("interpolation: Bilinear\n").expect("valid yaml");
        assert_eq!(config.interpolation, Interpolation::Bilinear);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "min_window: 5").expect("write config");
        let config = NavigatorConfig::load(file.path()).expect("valid config");
        assert_eq!(config.min_window, 5.0);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(
            NavigatorConfig::from_yaml_str("default_window: [oops"),
            Err(ConfigError::Parse(_))
        ));
    }
}
