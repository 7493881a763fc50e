//! モデル推論機能

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analysis::PredictionTable;
use crate::dataset::ImageFolderDataset;
use crate::ml::ml_model::{images_to_tensor, load_and_normalize_image, ModelConfig, TransferClassifier};
use crate::model::{load_model_with_metadata, log_metadata_info, InferenceConfig};

/// 単一画像の推論結果
#[derive(Debug, Clone, Serialize)]
pub struct ClassProbabilities {
    /// クラスごとの確率（クラスID順）
    pub probabilities: Vec<f32>,
    /// 予測クラスID
    pub class_index: usize,
    /// 予測クラス名
    pub label: String,
}

impl ClassProbabilities {
    pub fn confidence(&self) -> f32 {
        self.probabilities[self.class_index]
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: TransferClassifier<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .with_context(|| format!("Failed to load model: {:?}", model_path))?;
        log_metadata_info(&metadata);
        let config = InferenceConfig::from_metadata(&metadata);

        let model = ModelConfig::from_inference_config(&config).init::<B>(&device)?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        info!(path = %model_path.display(), classes = %config.class_labels.join(", "), "model loaded");
        Ok(Self::new(model, config, device))
    }

    pub fn new(model: TransferClassifier<B>, config: InferenceConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    /// 単一画像を分類
    pub fn predict_image<P: AsRef<Path>>(&self, image_path: P) -> Result<ClassProbabilities> {
        let probabilities = self
            .predict_batch(&[image_path.as_ref().to_path_buf()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty prediction"))?;

        let class_index = probabilities
            .iter()
            .enumerate()
            .fold(0, |best, (i, p)| if *p > probabilities[best] { i } else { best });
        let label = self
            .config
            .class_index_to_label(class_index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_index))?
            .to_string();

        Ok(ClassProbabilities {
            probabilities,
            class_index,
            label,
        })
    }

    /// 複数画像をまとめて推論し、画像ごとのクラス確率を返す
    pub fn predict_batch(&self, image_paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        if image_paths.is_empty() {
            return Ok(Vec::new());
        }

        let image_size = self.config.image_size;
        let mut pixels = Vec::with_capacity(image_paths.len() * 3 * image_size * image_size);
        for path in image_paths {
            pixels.extend(load_and_normalize_image(path, image_size)?);
        }

        let images = images_to_tensor::<B>(&pixels, image_paths.len(), image_size, &self.device);
        let output: Vec<f32> = self
            .model
            .forward_probabilities(images)
            .into_data()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        Ok(output
            .chunks(self.config.num_classes())
            .map(|chunk| chunk.to_vec())
            .collect())
    }

    /// データセット全体を推論（インデックス順）
    pub fn predict_dataset(
        &self,
        dataset: &ImageFolderDataset,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let paths: Vec<PathBuf> = dataset.items().iter().map(|item| item.path.clone()).collect();
        let mut probabilities = Vec::with_capacity(paths.len());

        for (i, chunk) in paths.chunks(batch_size.max(1)).enumerate() {
            probabilities.extend(self.predict_batch(chunk)?);
            debug!(batch = i, done = probabilities.len(), total = paths.len(), "inference progress");
        }

        Ok(probabilities)
    }

    /// データセット全体を推論し、推論結果テーブルを作成
    pub fn prediction_table(
        &self,
        dataset: &ImageFolderDataset,
        batch_size: usize,
    ) -> Result<PredictionTable> {
        let probabilities = self.predict_dataset(dataset, batch_size)?;
        PredictionTable::from_probabilities(&probabilities, &dataset.labels())
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}
