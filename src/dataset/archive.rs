//! データセットアーカイブ（tar.gz）の展開

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::{info, warn};

/// tar.gz を `dest` に展開し、画像が入っているディレクトリを返す
///
/// アーカイブの最上位が単一のディレクトリ（例: `train/`）ならそのパス、
/// そうでなければ `dest` を返します。`dest` の外に出るエントリは展開しません。
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open dataset archive: {:?}", archive_path))?;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {:?}", dest))?;

    let mut archive = Archive::new(GzDecoder::new(file));
    let mut top_level = BTreeSet::new();
    let mut top_level_is_file = false;
    let mut unpacked = 0usize;

    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read dataset archive: {:?}", archive_path))?
    {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let is_dir = entry.header().entry_type().is_dir();

        let mut components = path.components().filter(|c| matches!(c, Component::Normal(_)));
        let first = components.next();
        let nested = components.next().is_some();
        if let Some(Component::Normal(first)) = first {
            top_level.insert(first.to_os_string());
            if !nested && !is_dir {
                top_level_is_file = true;
            }
        }

        if entry.unpack_in(dest)? {
            if !is_dir {
                unpacked += 1;
            }
        } else {
            warn!(entry = %path.display(), "skipping archive entry outside destination");
        }
    }

    info!(
        archive = %archive_path.display(),
        dest = %dest.display(),
        files = unpacked,
        "dataset archive extracted"
    );

    if top_level.len() == 1 && !top_level_is_file {
        if let Some(name) = top_level.into_iter().next() {
            return Ok(dest.join(name));
        }
    }
    Ok(dest.to_path_buf())
}
