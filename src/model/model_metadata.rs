//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//! 推論時にはこのメタデータからモデル構造を復元するため、学習時の
//! 設定ファイルが無くても推論できます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// クラスラベル（インデックス順）
    /// 例: ["cat", "dog"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub image_size: u32,

    /// バックボーン各ブロックの出力チャネル数
    pub backbone_channels: Vec<usize>,

    /// 分類ヘッドの中間層ユニット数
    pub hidden_units: usize,

    /// 学習時にバックボーンを凍結していたか
    pub freeze_backbone: bool,

    /// 事前学習済み重みを使用したか
    #[serde(default)]
    pub pretrained_backbone: bool,

    /// 学習エポック数
    pub num_epochs: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        image_size: u32,
        backbone_channels: Vec<usize>,
        hidden_units: usize,
        freeze_backbone: bool,
        pretrained_backbone: bool,
        num_epochs: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            image_size,
            backbone_channels,
            hidden_units,
            freeze_backbone,
            pretrained_backbone,
            num_epochs,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let metadata = ModelMetadata::new(
            vec!["cat".to_string(), "dog".to_string()],
            224,
            vec![32, 64],
            64,
            true,
            false,
            10,
        );
        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(metadata, restored);
        assert_eq!(restored.num_classes(), 2);
        assert!(chrono::DateTime::parse_from_rfc3339(&restored.trained_at).is_ok());
    }

    #[test]
    fn test_invalid_json() {
        assert!(ModelMetadata::from_json_string("{ not json").is_err());
    }
}
