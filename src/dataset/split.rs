//! 学習用/検証用フォルダへの分割
//!
//! `cat.123.jpg` のようにファイル名の先頭がクラス名になっている
//! フラットなフォルダを、`train/<class>/` と `val/<class>/` に振り分けます。

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::is_image_file;
use crate::model::config::DataSettings;

/// 分割設定
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSettings {
    pub class_names: Vec<String>,
    /// 検証データの割合 [0, 1)
    pub val_ratio: f32,
    pub max_per_class: Option<usize>,
    pub move_files: bool,
    pub seed: u64,
}

impl From<&DataSettings> for SplitSettings {
    fn from(settings: &DataSettings) -> Self {
        Self {
            class_names: settings.class_names.clone(),
            val_ratio: settings.val_ratio,
            max_per_class: settings.max_per_class,
            move_files: settings.move_files,
            seed: settings.seed,
        }
    }
}

/// クラスごとの分割結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassSplit {
    pub train: usize,
    pub val: usize,
}

/// 分割結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub per_class: BTreeMap<String, ClassSplit>,
    /// 既存の分割をそのまま使った場合 true
    pub reused_existing: bool,
}

impl SplitSummary {
    pub fn total_train(&self) -> usize {
        self.per_class.values().map(|c| c.train).sum()
    }

    pub fn total_val(&self) -> usize {
        self.per_class.values().map(|c| c.val).sum()
    }
}

/// ファイル名からクラス名を取り出す（最初の `.` より前、小文字化）
pub fn label_from_file_name(file_name: &str) -> Option<String> {
    let (label, rest) = file_name.split_once('.')?;
    if label.is_empty() || rest.is_empty() {
        return None;
    }
    Some(label.to_lowercase())
}

/// 検証データの枚数（四捨五入）
pub fn val_count(total: usize, val_ratio: f32) -> usize {
    ((total as f64 * val_ratio as f64).round() as usize).min(total)
}

/// `source` の画像を `output/train/<class>` と `output/val/<class>` に分割
///
/// `output/train` が既に存在して空でない場合は何もせず、既存の枚数を返します。
pub fn split_dataset(source: &Path, output: &Path, settings: &SplitSettings) -> Result<SplitSummary> {
    if !(0.0..1.0).contains(&settings.val_ratio) {
        anyhow::bail!("val_ratio must be in [0, 1), got {}", settings.val_ratio);
    }
    if settings.class_names.is_empty() {
        anyhow::bail!("no class names configured");
    }

    let train_root = output.join("train");
    let val_root = output.join("val");

    if has_entries(&train_root)? {
        info!(output = %output.display(), "split already exists, reusing it");
        return summarize_existing(output, &settings.class_names);
    }

    let mut by_class = collect_by_class(source, &settings.class_names)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(settings.seed);
    let mut summary = SplitSummary::default();

    for class_name in &settings.class_names {
        let files = by_class.entry(class_name.clone()).or_default();
        if files.is_empty() {
            warn!(class = %class_name, source = %source.display(), "no images found for class");
        }

        files.sort();
        files.shuffle(&mut rng);
        if let Some(max) = settings.max_per_class {
            files.truncate(max);
        }

        let n_val = val_count(files.len(), settings.val_ratio);
        let (val_files, train_files) = files.split_at(n_val);

        place_files(val_files, &val_root.join(class_name), settings.move_files)?;
        place_files(train_files, &train_root.join(class_name), settings.move_files)?;

        info!(
            class = %class_name,
            train = train_files.len(),
            val = val_files.len(),
            "class split"
        );
        summary.per_class.insert(
            class_name.clone(),
            ClassSplit {
                train: train_files.len(),
                val: val_files.len(),
            },
        );
    }

    Ok(summary)
}

fn collect_by_class(source: &Path, class_names: &[String]) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut by_class: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for entry in std::fs::read_dir(source)
        .with_context(|| format!("Failed to read dataset directory: {:?}", source))?
    {
        let path = entry?.path();
        if !path.is_file() || !is_image_file(&path) {
            continue;
        }
        let label = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(label_from_file_name);

        let class_name = label.and_then(|label| {
            class_names.iter().find(|c| c.eq_ignore_ascii_case(&label))
        });
        if let Some(class_name) = class_name {
            by_class.entry(class_name.clone()).or_default().push(path);
        }
    }

    Ok(by_class)
}

fn place_files(files: &[PathBuf], dest_dir: &Path, move_files: bool) -> Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {:?}", dest_dir))?;

    for file in files {
        let Some(file_name) = file.file_name() else {
            continue;
        };
        let dest = dest_dir.join(file_name);
        if move_files {
            // 別ファイルシステム間では rename が失敗する
            if std::fs::rename(file, &dest).is_err() {
                std::fs::copy(file, &dest)
                    .with_context(|| format!("Failed to move {:?} to {:?}", file, dest))?;
                std::fs::remove_file(file)?;
            }
        } else {
            std::fs::copy(file, &dest)
                .with_context(|| format!("Failed to copy {:?} to {:?}", file, dest))?;
        }
    }

    Ok(())
}

fn has_entries(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(std::fs::read_dir(dir)?.next().is_some())
}

fn count_images(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            count += 1;
        }
    }
    Ok(count)
}

fn summarize_existing(output: &Path, class_names: &[String]) -> Result<SplitSummary> {
    let mut summary = SplitSummary {
        reused_existing: true,
        ..Default::default()
    };
    for class_name in class_names {
        summary.per_class.insert(
            class_name.clone(),
            ClassSplit {
                train: count_images(&output.join("train").join(class_name))?,
                val: count_images(&output.join("val").join(class_name))?,
            },
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_file_name() {
        assert_eq!(label_from_file_name("cat.12.jpg"), Some("cat".to_string()));
        assert_eq!(label_from_file_name("Dog.3.png"), Some("dog".to_string()));
        assert_eq!(label_from_file_name("noext"), None);
        assert_eq!(label_from_file_name(".hidden"), None);
    }

    #[test]
    fn test_val_count() {
        assert_eq!(val_count(10, 0.2), 2);
        assert_eq!(val_count(7, 0.25), 2);
        assert_eq!(val_count(0, 0.2), 0);
        assert_eq!(val_count(5, 0.0), 0);
    }

    #[test]
    fn test_invalid_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SplitSettings {
            class_names: vec!["cat".to_string()],
            val_ratio: 1.0,
            max_per_class: None,
            move_files: false,
            seed: 1,
        };
        assert!(split_dataset(dir.path(), &dir.path().join("out"), &settings).is_err());
    }
}
