use ndarray::{ArrayView2, ArrayView3};
use std::env;
use std::error::Error;
use std::path::PathBuf;
use widefield_demux::{
    load, AnatomicalRow, ChannelBundle, LandmarkPair, SessionConfig, SessionSink,
};

/// Prints what would be written and saves the anatomical table as CSV.
struct SummarySink {
    output_dir: PathBuf,
}

impl SessionSink for SummarySink {
    fn write_bundle(&mut self, session_id: &str, bundle: &ChannelBundle) -> widefield_demux::Result<()> {
        println!(
            "[{}] {}: {} samples at {:.3} Hz",
            session_id,
            bundle.channel.series_name(),
            bundle.len(),
            bundle.channel.sampling_rate_hz
        );
        Ok(())
    }

    fn write_image(
        &mut self,
        session_id: &str,
        name: &str,
        image: ArrayView2<f64>,
    ) -> widefield_demux::Result<()> {
        println!("[{}] image '{}' {:?}", session_id, name, image.dim());
        Ok(())
    }

    fn write_anatomical_table(
        &mut self,
        session_id: &str,
        rows: &[AnatomicalRow],
        _pairs: &[LandmarkPair],
    ) -> widefield_demux::Result<()> {
        let path = self.output_dir.join(format!("{}_landmarks.csv", session_id));
        let mut writer = csv::Writer::from_path(&path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        println!("[{}] {} landmarks -> {}", session_id, rows.len(), path.display());
        Ok(())
    }

    fn write_spatial_components(
        &mut self,
        session_id: &str,
        components: ArrayView3<f64>,
    ) -> widefield_demux::Result<()> {
        println!("[{}] spatial components {:?}", session_id, components.dim());
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let folder = args
        .next()
        .ok_or("usage: process_folder <session folder> [config.json]")?;
    let config = match args.next() {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };

    let result = load(&folder, &config)?;
    let mut sink = SummarySink {
        output_dir: env::temp_dir(),
    };
    result.emit(&mut sink)?;

    for warning in &result.warnings {
        println!("Warning: {}", warning);
    }

    Ok(())
}
