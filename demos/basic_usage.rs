use ndarray::{Array1, Array2};
use std::error::Error;
use widefield_demux::channels::{ArraySource, ChannelSource};
use widefield_demux::{
    process_session, ChannelId, LandmarkCorrespondence, LandmarkSet, LightSource,
    LightSourceTable, Point2, SessionConfig, SessionInputs,
};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    // Synthetic session: 200 frames alternating between the blue and violet LEDs
    let num_samples = 200;
    let channel_ids = Array1::from_iter((0..num_samples).map(|i| if i % 2 == 0 { 2 } else { 1 }));
    let timestamps = Array1::from_iter((0..num_samples).map(|i| i as f64 / 60.0));

    let light_sources = LightSourceTable::new(vec![
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
    ]);

    let mut inputs = SessionInputs::new(
        "synthetic",
        vec![ChannelSource::Array(ArraySource {
            channel_ids,
            timestamps: Some(timestamps),
        })],
        light_sources,
    );
    inputs.traces = Some(Array2::from_shape_fn((8, num_samples), |(roi, t)| {
        (roi as f64 + 1.0) * (t as f64 / 10.0).sin()
    }));
    inputs.dff = Some(Array2::zeros((8, num_samples)));

    // Three landmarks rotated by 90 degrees and shifted
    let source = LandmarkSet::from_points(vec![
        Point2::new(10.0, 10.0),
        Point2::new(50.0, 10.0),
        Point2::new(30.0, 40.0),
    ]);
    let target = LandmarkSet::from_points(vec![
        Point2::new(90.0, 10.0),
        Point2::new(90.0, 50.0),
        Point2::new(60.0, 30.0),
    ]);
    inputs.landmarks = Some(LandmarkCorrespondence::new(source, target, None)?);

    let config = SessionConfig {
        excitation_wavelength_nm: Some(470),
        ..SessionConfig::default()
    };
    let result = process_session(inputs, &config)?;

    // Print per-channel summary
    println!("Session '{}'", result.session_id);
    println!("Default channel: {}", result.default_channel);
    for bundle in &result.bundles {
        println!(
            "  {} ({}): {} samples, {:.1} Hz, {:.2} s, {} ROIs, dF/F: {}",
            bundle.channel.series_name(),
            bundle.channel.color.as_deref().unwrap_or("-"),
            bundle.len(),
            bundle.channel.sampling_rate_hz,
            bundle.duration(),
            bundle.num_rois(),
            bundle.dff.is_some()
        );
    }

    // Print alignment summary
    if let Some(alignment) = &result.alignment {
        let t = &alignment.transform.transform;
        println!(
            "\nTransform: angle {:.1} deg, scale {:.3}, translation ({:.2}, {:.2})",
            t.rotation_angle().to_degrees(),
            t.scale(),
            t.translation()[0],
            t.translation()[1]
        );
        if let Some(report) = &alignment.transform.report {
            println!("RMS residual: {:.3e}", report.rms);
        }
        for row in &alignment.anatomical_rows {
            println!("  {}: ({:.2}, {:.2})", row.region_label, row.x, row.y);
        }
    }

    for warning in &result.warnings {
        println!("Warning: {}", warning);
    }

    Ok(())
}
