//! Light-source properties table (`imagingLightSource.properties.htsv`).

use log::debug;
use std::io::Read;

use crate::types::*;

/// Channel id → wavelength/color lookup for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightSourceTable {
    rows: Vec<LightSource>,
}

impl LightSourceTable {
    pub fn new(rows: Vec<LightSource>) -> Self {
        LightSourceTable { rows }
    }

    /// Parses a tab- or comma-separated table with a header row.
    ///
    /// The id column may be called `channel_id` or `LED`; `wavelength` is
    /// required and `color` is optional.
    pub fn parse<R: Read>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let header_line = text.lines().next().unwrap_or("");
        let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = csv_reader.headers()?.clone();
        let column = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| headers.iter().position(|h| h == *name))
        };
        let missing = |name: &str| WidefieldError::MissingColumn {
            table: "light_source_properties".to_string(),
            column: name.to_string(),
        };

        let id_col = column(&["channel_id", "LED"]).ok_or_else(|| missing("channel_id"))?;
        let wavelength_col = column(&["wavelength"]).ok_or_else(|| missing("wavelength"))?;
        let color_col = column(&["color"]);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let channel_id = parse_integer(record.get(id_col), "channel_id")?;
            let wavelength_nm = parse_integer(record.get(wavelength_col), "wavelength")?;
            let color = color_col
                .and_then(|c| record.get(c))
                .unwrap_or("")
                .to_string();
            rows.push(LightSource {
                channel_id: ChannelId(channel_id),
                color,
                wavelength_nm,
            });
        }

        debug!("Loaded {} light sources", rows.len());
        Ok(LightSourceTable { rows })
    }

    pub fn rows(&self) -> &[LightSource] {
        &self.rows
    }

    /// Properties of `channel`, if listed.
    pub fn get(&self, channel: ChannelId) -> Option<&LightSource> {
        self.rows.iter().find(|r| r.channel_id == channel)
    }

    /// Channel id of the first light source emitting at `wavelength_nm`.
    pub fn channel_for_wavelength(&self, wavelength_nm: u32) -> Result<ChannelId> {
        self.rows
            .iter()
            .find(|r| r.wavelength_nm == wavelength_nm)
            .map(|r| r.channel_id)
            .ok_or(WidefieldError::UnknownWavelength(wavelength_nm))
    }

    /// Builds the channel description for `channel` at the given rate.
    pub fn describe(&self, channel: ChannelId, sampling_rate_hz: f64) -> Channel {
        let source = self.get(channel);
        Channel {
            id: channel,
            wavelength_nm: source.map(|s| s.wavelength_nm),
            color: source.map(|s| s.color.clone()).filter(|c| !c.is_empty()),
            sampling_rate_hz,
        }
    }
}

// Values written by pandas may carry a fractional part ("470.0").
fn parse_integer(field: Option<&str>, column: &str) -> Result<u32> {
    let field = field.unwrap_or("");
    let value = field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0 && *v <= u32::MAX as f64);
    value.map(|v| v as u32).ok_or_else(|| {
        WidefieldError::UnrecognizedFileFormat(format!(
            "light-source column '{}' has non-integer value '{}'",
            column, field
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tab_separated() {
        let text = "channel_id\tcolor\twavelength\n1\tBlue\t470\n2\tViolet\t405.0\n";
        let table = LightSourceTable::parse(text.as_bytes()).unwrap();
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.channel_for_wavelength(405).unwrap(), ChannelId(2));
        assert_eq!(table.get(ChannelId(1)).unwrap().color, "Blue");
    }

    #[test]
    fn test_parse_comma_separated_led_column() {
        let text = "LED,wavelength,color\n0, 470 ,Blue\n1,405,Violet\n";
        let table = LightSourceTable::parse(text.as_bytes()).unwrap();
        assert_eq!(table.channel_for_wavelength(470).unwrap(), ChannelId(0));
    }

    #[test]
    fn test_missing_wavelength_column() {
        let text = "channel_id,color\n1,Blue\n";
        assert!(matches!(
            LightSourceTable::parse(text.as_bytes()),
            Err(WidefieldError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_unknown_wavelength() {
        let table = LightSourceTable::default();
        assert!(matches!(
            table.channel_for_wavelength(470),
            Err(WidefieldError::UnknownWavelength(470))
        ));
    }

    #[test]
    fn test_describe_unlisted_channel() {
        let table = LightSourceTable::new(vec![LightSource {
            channel_id: ChannelId(1),
            color: "Blue".to_string(),
            wavelength_nm: 470,
        }]);
        let listed = table.describe(ChannelId(1), 30.0);
        assert_eq!(listed.role(), Some(ChannelRole::Functional));
        let unlisted = table.describe(ChannelId(7), 30.0);
        assert_eq!(unlisted.wavelength_nm, None);
        assert_eq!(unlisted.color, None);
    }
}
