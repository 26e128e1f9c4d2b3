use byteorder::{LittleEndian, WriteBytesExt};
use std::fs;
use std::path::Path;
use widefield_demux::{ChannelId, LightSource, LightSourceTable};

/// Writes a little-endian `f8` NPY file (format version 1, C order).
pub fn write_npy_f64(path: &Path, shape: &[usize], values: &[f64]) {
    assert_eq!(shape.iter().product::<usize>(), values.len());
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_text = if dims.len() == 1 {
        format!("({},)", dims[0])
    } else {
        format!("({})", dims.join(", "))
    };
    let mut dict = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}",
        shape_text
    );
    while (10 + dict.len() + 1) % 64 != 0 {
        dict.push(' ');
    }
    dict.push('\n');

    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.write_u16::<LittleEndian>(dict.len() as u16).unwrap();
    bytes.extend_from_slice(dict.as_bytes());
    for v in values {
        bytes.write_f64::<LittleEndian>(*v).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

pub const LIGHT_SOURCES_HTSV: &str = "channel_id\tcolor\twavelength\n1\tBlue\t470\n2\tViolet\t405\n";

pub fn light_sources() -> LightSourceTable {
    LightSourceTable::new(vec![
        LightSource {
            channel_id: ChannelId(1),
            color: "Blue".to_string(),
            wavelength_nm: 470,
        },
        LightSource {
            channel_id: ChannelId(2),
            color: "Violet".to_string(),
            wavelength_nm: 405,
        },
    ])
}

/// Camera log with annotations, `n` alternating LED records starting with
/// channel 2, and frames sampled at `rate` Hz.
pub fn camera_log(n: usize, rate: f64) -> String {
    let mut text = String::from("# camera log\n#Version 3\n");
    for i in 0..n {
        let channel = if i % 2 == 0 { 2 } else { 1 };
        text.push_str(&format!("#LED:{},{},{:.6}\n", channel, i + 1, i as f64 / rate));
        if i % 10 == 0 {
            text.push_str("#TRIGGER:1\n");
        }
    }
    text
}
