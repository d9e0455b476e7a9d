//! Diagnostic output for the exposure-time fit
//!
//! The fitter emits an Octave/MATLAB script with the raw (observed,
//! fitted, original) triples and two scatter plots. A good fit puts the
//! data points on the diagonal of the second plot.

use std::path::Path;

/// One (patch, exposure) sample of the fit.
pub struct FitPoint {
    /// Observed mean green value of the patch on this exposure
    pub observed: f32,
    /// Patch radiance times the fitted exposure time
    pub fitted: f32,
    /// Patch radiance times the original (EXIF) exposure time
    pub original: f32,
}

/// Write the plotting script comparing fitted and original exposure times.
pub fn write_fit_script<P: AsRef<Path>>(path: P, points: &[FitPoint]) -> Result<(), String> {
    let mut script = String::with_capacity(points.len() * 48 + 512);

    script.push_str("datapoints=[");
    for point in points {
        script.push_str(&format!(
            "{:.10}, {:.10}, {:.10}; ",
            point.observed, point.fitted, point.original
        ));
    }
    script.push_str("];\n");
    script.push_str("subplot(2,1,1)\n");
    script.push_str("plot(datapoints(:,3), datapoints(:,1), '.');\n");
    script.push_str("hold on;\n");
    script.push_str("title('Exposure times provided by the EXIF tags');\n");
    script.push_str("plot([0 1],[0 1], 'r');\n");
    script.push_str("subplot(2,1,2)\n");
    script.push_str("plot(datapoints(:,2), datapoints(:,1), '.');\n");
    script.push_str("hold on;\n");
    script.push_str("title('Fitted exposure times');\n");
    script.push_str("plot([0 1],[0 1], 'r');\n");

    std::fs::write(path.as_ref(), script)
        .map_err(|e| format!("Failed to write {}: {}", path.as_ref().display(), e))
}
