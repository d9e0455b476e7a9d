//! Output-path derivation.

use std::path::{Path, PathBuf};

use hdrfuse_core::models::OutputFormat;

/// Determine where the merged image goes.
///
/// An explicit file path wins; an explicit directory gets the first
/// input's stem; with nothing given the output lands next to the first
/// input with the format's extension.
pub fn determine_output_path(
    first_input: &Path,
    out: &Option<PathBuf>,
    format: OutputFormat,
) -> Result<PathBuf, String> {
    let stem = first_input
        .file_stem()
        .ok_or_else(|| format!("Cannot derive an output name from {}", first_input.display()))?;
    let filename = {
        let mut name = stem.to_os_string();
        name.push(".");
        name.push(format.extension());
        name
    };

    match out {
        Some(path) if path.is_dir() => Ok(path.join(filename)),
        Some(path) => Ok(path.clone()),
        None => Ok(first_input.with_file_name(filename)),
    }
}
