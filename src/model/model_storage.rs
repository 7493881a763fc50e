//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、モデル構造など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::info;

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを `.tar.gz` に正規化
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存したファイルのパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// Tar.gzを走査し、指定したエントリを読み込む
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);
    let mut found: Vec<Option<Vec<u8>>> = vec![None; wanted.len()];

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();

        if let Some(slot) = wanted.iter().position(|name| *name == path) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found[slot] = Some(buffer);
        }
    }

    Ok(found)
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json_str = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let bytes = read_entries(tar_gz_path, &[METADATA_ENTRY])?
        .pop()
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("metadata.json not found in tar.gz archive"))?;
    parse_metadata(bytes)
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    read_entries(tar_gz_path, &[MODEL_ENTRY])?
        .pop()
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("model.bin not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut found = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?.into_iter();

    match (found.next().flatten(), found.next().flatten()) {
        (Some(metadata), Some(binary)) => Ok((parse_metadata(metadata)?, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    info!(
        classes = %metadata.class_labels.join(", "),
        image_size = metadata.image_size,
        backbone = ?metadata.backbone_channels,
        hidden_units = metadata.hidden_units,
        freeze_backbone = metadata.freeze_backbone,
        pretrained_backbone = metadata.pretrained_backbone,
        num_epochs = metadata.num_epochs,
        trained_at = %metadata.trained_at,
        "model metadata"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata::new(
            vec!["cat".to_string(), "dog".to_string()],
            64,
            vec![8, 16],
            32,
            true,
            true,
            2,
        )
    }

    #[test]
    fn test_archive_path() {
        assert_eq!(archive_path(Path::new("m/model")), PathBuf::from("m/model.tar.gz"));
        assert_eq!(archive_path(Path::new("m/model.tar.gz")), PathBuf::from("m/model.tar.gz"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = sample_metadata();
        let binary = vec![1u8, 2, 3, 4, 5];

        let path = save_model_with_metadata(&dir.path().join("nested/model"), &metadata, &binary)
            .unwrap();
        assert!(path.exists());

        assert_eq!(load_metadata(&path).unwrap(), metadata);
        assert_eq!(load_model_binary(&path).unwrap(), binary);

        let (m, b) = load_model_with_metadata(&path).unwrap();
        assert_eq!(m.class_labels, metadata.class_labels);
        assert_eq!(b, binary);
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar.gz");

        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        append_entry(&mut builder, MODEL_ENTRY, &[0u8; 4]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(load_metadata(&path).is_err());
        assert!(load_model_with_metadata(&path).is_err());
        assert!(load_model_binary(&path).is_ok());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_metadata(Path::new("does/not/exist.tar.gz")).is_err());
    }
}
