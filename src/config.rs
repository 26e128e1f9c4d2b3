//! Per-session processing options.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::types::*;

/// Options that steer how a session is demultiplexed and aligned.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wavelength of the channel that receives haemodynamically corrected traces
    pub dff_wavelength_nm: u32,
    /// Wavelength of the channel used for single-channel outputs
    pub excitation_wavelength_nm: Option<u32>,
    /// Frame rate of the raw interleaved stream; estimated from timestamps when absent
    pub combined_rate_hz: Option<f64>,
    /// Per-channel rate that replaces the derived one
    pub sampling_rate_override_hz: Option<f64>,
    /// `(height, width)` of the warped reference image; defaults to the mean image shape
    pub reference_shape: Option<(usize, usize)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            dff_wavelength_nm: 470,
            excitation_wavelength_nm: None,
            combined_rate_hz: None,
            sampling_rate_override_hz: None,
            reference_shape: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"excitation_wavelength_nm": 405}"#).unwrap();
        assert_eq!(config.dff_wavelength_nm, 470);
        assert_eq!(config.excitation_wavelength_nm, Some(405));
        assert_eq!(config.combined_rate_hz, None);
    }

    #[test]
    fn test_round_trip_through_file() {
        let config = SessionConfig {
            combined_rate_hz: Some(60.0),
            reference_shape: Some((540, 640)),
            ..SessionConfig::default()
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json_string().unwrap().as_bytes())
            .unwrap();

        let loaded = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            SessionConfig::from_json_file(file.path()),
            Err(WidefieldError::Json(_))
        ));
    }
}
