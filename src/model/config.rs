//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、データセット、モデル、学習、データ拡張、分析の設定を
//! JSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// WGPU の CPU フォールバック
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "WGPU (CPU)"),
        }
    }
}

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// 展開済み画像（`cat.0.jpg` 形式のフラットなフォルダ）
    pub raw_dir: String,
    /// 分割後のルート（`train/<class>`, `val/<class>` を作成）
    pub data_dir: String,
    /// クラス名（この順序がクラスIDになる）
    pub class_names: Vec<String>,
    /// 検証データの割合
    pub val_ratio: f32,
    /// クラスあたりの最大枚数（None なら全件）
    #[serde(default)]
    pub max_per_class: Option<usize>,
    /// true なら元ファイルを移動、false ならコピー
    #[serde(default)]
    pub move_files: bool,
    /// 分割時のシャッフル用シード
    pub seed: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            raw_dir: "raw/train".to_string(),
            data_dir: "data".to_string(),
            class_names: vec!["cat".to_string(), "dog".to_string()],
            val_ratio: 0.2,
            max_per_class: None,
            move_files: false,
            seed: 42,
        }
    }
}

impl DataSettings {
    pub fn train_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("train")
    }

    pub fn val_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("val")
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習済みモデル（tar.gz）のパス
    pub model_path: String,
    /// 事前学習済みバックボーンの重み（.mpk）。None ならランダム初期化
    #[serde(default)]
    pub backbone_weights: Option<String>,
    /// バックボーン各ブロックの出力チャネル数
    pub backbone_channels: Vec<usize>,
    /// バックボーンを凍結して分類ヘッドのみ学習する
    pub freeze_backbone: bool,
    /// 分類ヘッドの中間層ユニット数
    pub hidden_units: usize,
    /// ドロップアウト率
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/pet_classifier.tar.gz".to_string(),
            backbone_weights: None,
            backbone_channels: vec![32, 64, 128, 256],
            freeze_backbone: true,
            hidden_units: 64,
            dropout: 0.5,
            image_size: 224,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 64,
            num_workers: 1,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

/// データ拡張設定（学習データのみに適用）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AugmentationConfig {
    /// 左右反転
    pub horizontal_flip: bool,
    /// 回転角の範囲（度、±）
    pub rotation_range: f32,
    /// 横方向シフトの範囲（画像幅に対する割合、±）
    pub width_shift_range: f32,
    /// 縦方向シフトの範囲（画像高さに対する割合、±）
    pub height_shift_range: f32,
    /// ズームの範囲（1.0 ± zoom_range）
    pub zoom_range: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip: true,
            rotation_range: 20.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            zoom_range: 0.2,
        }
    }
}

impl AugmentationConfig {
    /// 拡張なし
    pub fn none() -> Self {
        Self {
            horizontal_flip: false,
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            zoom_range: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        !self.horizontal_flip
            && self.rotation_range == 0.0
            && self.width_shift_range == 0.0
            && self.height_shift_range == 0.0
            && self.zoom_range == 0.0
    }
}

/// 分析設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// ランキングごとの表示件数
    pub top_n: usize,
    /// 推論時のバッチサイズ
    pub batch_size: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            top_n: 10,
            batch_size: 32,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

impl AppConfig {
    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "config loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.data.class_names.len()
    }

    /// 設定内容をログに出力
    pub fn log_summary(&self) {
        info!(device = %self.device_type, "device");
        info!(
            classes = %self.data.class_names.join(", "),
            data_dir = %self.data.data_dir,
            val_ratio = self.data.val_ratio,
            "dataset"
        );
        info!(
            image_size = self.model.image_size,
            backbone = ?self.model.backbone_channels,
            freeze_backbone = self.model.freeze_backbone,
            hidden_units = self.model.hidden_units,
            dropout = self.model.dropout,
            "model"
        );
        info!(
            epochs = self.training.num_epochs,
            batch_size = self.training.batch_size,
            learning_rate = self.training.learning_rate,
            seed = self.training.seed,
            "training"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.data.class_names, vec!["cat", "dog"]);
        assert_eq!(config.num_classes(), 2);
        assert!(config.model.freeze_backbone);
        assert_eq!(config.model.image_size, 224);
        assert_eq!(config.data.train_dir(), PathBuf::from("data").join("train"));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.hidden_units, deserialized.model.hidden_units);
        assert_eq!(config.augmentation, deserialized.augmentation);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "device_type": "Cpu", "analysis": { "top_n": 3, "batch_size": 8 } }"#)
                .unwrap();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.analysis.top_n, 3);
        assert_eq!(config.training.num_epochs, 10);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("missing.json"));
        assert_eq!(config.num_classes(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.training.num_epochs = 3;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.training.num_epochs, 3);
    }

    #[test]
    fn test_augmentation_identity() {
        assert!(AugmentationConfig::none().is_identity());
        assert!(!AugmentationConfig::default().is_identity());
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "WGPU (CPU)");
    }
}
