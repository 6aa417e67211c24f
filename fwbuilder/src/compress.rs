use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, error, info};
use types::FwBuilderError;

use crate::host::{Host, ToolCommand};

/// Tool and file suffix of a compression method
fn compressor(method: &str) -> Option<(&'static str, &'static str)> {
    Some(match method {
        "lzma" => ("lzma", "lzma"),
        "xz" => ("xz", "xz"),
        "bzip2" => ("bzip2", "bz2"),
        "gzip" => ("gzip", "gz"),
        _ => return None,
    })
}

/// Compresses the image in place, and returns where it ended up.
///
/// Unknown methods leave the image untouched.
pub(crate) fn compress(
    host: &mut dyn Host,
    image: &Path,
    method: Option<&str>,
    options: &[String],
) -> Result<PathBuf, FwBuilderError> {
    let Some(method) = method else {
        debug!("No compression requested");
        return Ok(image.to_path_buf());
    };

    let Some((tool, suffix)) = compressor(method) else {
        error!("Unknown compression method {method}, leaving the image uncompressed");
        return Ok(image.to_path_buf());
    };

    let mut compressed = image.as_os_str().to_os_string();
    compressed.push(".");
    compressed.push(suffix);
    let compressed = PathBuf::from(compressed);

    if compressed.exists() {
        debug!("Removing previous {}", compressed.display());
        fs::remove_file(&compressed)?;
    }

    info!("Compressing {} with {tool}", image.display());
    host.run_checked(&ToolCommand::new(tool).args(options).arg(image))?;

    Ok(compressed)
}
