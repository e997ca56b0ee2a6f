use crate::pipeline::ExtractionResult;
use std::fs;
use std::path::{Path, PathBuf};

/// Persist a finalized extraction result, addressed by the screenshot's
/// sha256 digest so reprocessing an identical image is traceable.
///
/// Layout: `<root>/sha256/ab/cd/<digest>.json`.
pub fn write_result(
    root: &Path,
    image_digest: &str,
    result: &ExtractionResult,
) -> anyhow::Result<PathBuf> {
    anyhow::ensure!(
        image_digest.len() >= 4 && image_digest.chars().all(|c| c.is_ascii_hexdigit()),
        "invalid image digest: {image_digest}"
    );

    let dir = root
        .join("sha256")
        .join(&image_digest[0..2])
        .join(&image_digest[2..4]);
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("{image_digest}.json"));
    let json = serde_json::to_vec_pretty(result)?;
    fs::write(&path, json)?;
    Ok(path)
}
