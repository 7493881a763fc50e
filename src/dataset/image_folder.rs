//! クラスごとのフォルダに分かれた画像データセット
//!
//! `<root>/<class>/*.jpg` を走査し、(画像パス, クラスID) の一覧を保持します。
//! 並び順はクラス順 → ファイルパス順で固定なので、インデックスは
//! 推論結果テーブルのサンプルインデックスとしてそのまま使えます。

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::is_image_file;

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug, PartialEq)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

/// 画像フォルダデータセット
#[derive(Clone, Debug)]
pub struct ImageFolderDataset {
    samples: Vec<ImageItem>,
    class_names: Vec<String>,
}

impl ImageFolderDataset {
    /// 指定された順序でディレクトリから画像を読み込む
    ///
    /// `class_order` の位置がクラスIDになります。存在しないクラスフォルダは
    /// 警告を出してスキップします。
    pub fn from_directory_with_order(data_dir: &Path, class_order: &[String]) -> Result<Self> {
        let mut samples = Vec::new();

        for (class_id, class_name) in class_order.iter().enumerate() {
            let class_dir = data_dir.join(class_name);
            if !class_dir.is_dir() {
                warn!(class = %class_name, dir = %class_dir.display(), "class directory not found");
                continue;
            }

            let mut paths = Vec::new();
            for entry in std::fs::read_dir(&class_dir)? {
                let path = entry?.path();
                if path.is_file() && is_image_file(&path) {
                    paths.push(path);
                }
            }
            paths.sort();

            samples.extend(paths.into_iter().map(|path| ImageItem {
                path,
                label: class_id,
            }));
        }

        let dataset = Self {
            samples,
            class_names: class_order.to_vec(),
        };
        info!(
            dir = %data_dir.display(),
            samples = dataset.len(),
            per_class = ?dataset.class_counts(),
            "image folder loaded"
        );
        Ok(dataset)
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn item(&self, index: usize) -> Option<&ImageItem> {
        self.samples.get(index)
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.samples
    }

    /// 正解ラベル列（インデックス順）
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|item| item.label).collect()
    }

    /// クラスごとのサンプル数
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for item in &self.samples {
            counts[item.label] += 1;
        }
        counts
    }

    /// 画像が1枚も無いクラス名の一覧
    pub fn empty_classes(&self) -> Vec<String> {
        self.class_counts()
            .into_iter()
            .zip(&self.class_names)
            .filter(|(count, _)| *count == 0)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[cfg(feature = "ml")]
impl burn_dataset::Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
