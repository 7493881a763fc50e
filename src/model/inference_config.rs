//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use tracing::info;

use crate::model::model_metadata::ModelMetadata;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// クラスラベル一覧（インデックス順）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub image_size: usize,

    /// バックボーン構造
    pub backbone_channels: Vec<usize>,

    /// 分類ヘッドの中間層ユニット数
    pub hidden_units: usize,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            image_size: metadata.image_size as usize,
            backbone_channels: metadata.backbone_channels.clone(),
            hidden_units: metadata.hidden_units,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// ラベルからクラスインデックスを取得（大文字小文字は区別しない）
    pub fn label_to_index(&self, label: &str) -> Option<usize> {
        self.class_labels
            .iter()
            .position(|l| l.eq_ignore_ascii_case(label))
    }

    /// 設定情報をログに出力
    pub fn log_info(&self) {
        info!(
            classes = %self.class_labels.join(", "),
            image_size = self.image_size,
            backbone = ?self.backbone_channels,
            hidden_units = self.hidden_units,
            "inference config"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InferenceConfig {
        let metadata = ModelMetadata::new(
            vec!["cat".to_string(), "dog".to_string()],
            128,
            vec![16, 32],
            64,
            true,
            false,
            5,
        );
        InferenceConfig::from_metadata(&metadata)
    }

    #[test]
    fn test_from_metadata() {
        let config = config();
        assert_eq!(config.num_classes(), 2);
        assert_eq!(config.image_size, 128);
        assert_eq!(config.backbone_channels, vec![16, 32]);
    }

    #[test]
    fn test_label_mapping() {
        let config = config();
        assert_eq!(config.class_index_to_label(1), Some("dog"));
        assert_eq!(config.class_index_to_label(2), None);
        assert_eq!(config.label_to_index("Cat"), Some(0));
        assert_eq!(config.label_to_index("bird"), None);
    }
}
