pub mod archive;
pub mod split;
pub mod image_folder;

pub use archive::extract_archive;
pub use split::{split_dataset, label_from_file_name, SplitSettings, SplitSummary, ClassSplit};
pub use image_folder::{ImageFolderDataset, ImageItem};

use std::path::Path;

/// 対応する画像拡張子
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 拡張子で画像ファイルかどうかを判定（大文字小文字は区別しない）
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
