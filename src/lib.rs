pub mod channels;
pub mod config;
pub mod landmarks;
pub mod light_source;
pub mod partition;
pub mod reader;
pub mod session;
pub mod timing;
pub mod transform;
pub mod types;

use std::path::Path;

// Re-export types
pub use config::SessionConfig;
pub use landmarks::LandmarkCorrespondence;
pub use light_source::LightSourceTable;
pub use reader::{load_processed_session, load_raw_session, RawSessionPaths};
pub use session::{
    process_session, process_sessions, FramePayload, SessionInputs, SessionResult, SessionSink,
};
pub use transform::{FitReport, SimilarityTransform};
pub use types::*;

/// Loads a processed session folder and demultiplexes it.
///
/// # Examples
///
/// ```no_run
/// use widefield_demux::{load, SessionConfig};
///
/// let result = load("path/to/session/alf/widefield", &SessionConfig::default());
/// match result {
///     Ok(session) => {
///         for bundle in &session.bundles {
///             println!("{}: {} samples at {} Hz", bundle.channel.label(), bundle.len(), bundle.channel.sampling_rate_hz);
///         }
///     }
///     Err(e) => println!("Error processing session: {}", e),
/// }
/// ```
pub fn load<P: AsRef<Path>>(folder: P, config: &SessionConfig) -> Result<SessionResult> {
    let inputs = reader::load_processed_session(folder)?;
    session::process_session(inputs, config)
}
