//! モデル学習
//!
//! 凍結したバックボーンの上で分類ヘッドを学習し、メタデータと共に保存します。

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::Module,
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use burn_autodiff::Autodiff;
use burn_wgpu::{Wgpu, WgpuDevice};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::{ImageFolderDataset, ImageItem};
use crate::ml::augmentation::augment_image;
use crate::ml::ml_model::{images_to_tensor, load_rgb_image, normalize_image, ModelConfig, TransferClassifier};
use crate::model::config::{AppConfig, AugmentationConfig, DeviceType};
use crate::model::{save_model_with_metadata, ModelMetadata};

/// バッチャー
///
/// 画像をロードしてリサイズ・正規化します。`augmentation` が設定されていれば
/// 学習用としてランダム拡張を適用します。
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    augmentation: Option<AugmentationConfig>,
}

impl<B: Backend> ImageBatcher<B> {
    /// 検証用（拡張なし）
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self {
            device,
            image_size,
            augmentation: None,
        }
    }

    /// 学習用（拡張あり）
    pub fn with_augmentation(mut self, augmentation: AugmentationConfig) -> Self {
        if !augmentation.is_identity() {
            self.augmentation = Some(augmentation);
        }
        self
    }

    fn load_item(&self, item: &ImageItem, rng: &mut impl rand::Rng) -> Result<Vec<f32>> {
        let img = load_rgb_image(&item.path, self.image_size)?;
        let img = match &self.augmentation {
            Some(config) => augment_image(&img, config, rng),
            None => img,
        };
        Ok(normalize_image(&img))
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let pixels_per_image = 3 * self.image_size * self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * pixels_per_image);
        let mut targets_vec = Vec::with_capacity(batch_size);
        let mut rng = rand::thread_rng();

        for item in items {
            match self.load_item(&item, &mut rng) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => {
                    // 1枚の破損ファイルで学習全体を止めない
                    warn!(path = %item.path.display(), error = %e, "failed to load image, zero-filling");
                    all_pixels.extend(std::iter::repeat(0.0f32).take(pixels_per_image));
                }
            }
            targets_vec.push(item.label as i64);
        }

        let images = images_to_tensor::<B>(&all_pixels, batch_size, self.image_size, &self.device);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for TransferClassifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for TransferClassifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    pub train_samples: usize,
    pub val_samples: usize,
    pub num_epochs: usize,
    pub num_params: usize,
}

/// 設定のデバイス種別から WGPU デバイスを選択
pub fn select_device(device_type: &DeviceType) -> WgpuDevice {
    match device_type {
        DeviceType::Wgpu => WgpuDevice::DiscreteGpu(0),
        DeviceType::Cpu => WgpuDevice::Cpu,
    }
}

/// 学習・検証データを読み込み、各クラスに画像があるか検証する
pub fn load_split_datasets(config: &AppConfig) -> Result<(ImageFolderDataset, ImageFolderDataset)> {
    let classes = &config.data.class_names;
    let train = ImageFolderDataset::from_directory_with_order(&config.data.train_dir(), classes)
        .context("Failed to load training images")?;
    let val = ImageFolderDataset::from_directory_with_order(&config.data.val_dir(), classes)
        .context("Failed to load validation images")?;

    for (split, dataset) in [("train", &train), ("val", &val)] {
        let empty = dataset.empty_classes();
        if !empty.is_empty() {
            anyhow::bail!(
                "no {} images for class(es): {} (run `prepare` first?)",
                split,
                empty.join(", ")
            );
        }
    }

    if let Some(first) = train.item(0) {
        load_rgb_image(&first.path, config.model.image_size)
            .context("Training images cannot be decoded")?;
    }

    Ok((train, val))
}

/// モデル学習を実行（WGPU バックエンド）
pub fn train_model(config: &AppConfig, output_model_path: &Path) -> Result<TrainingReport> {
    let device = select_device(&config.device_type);
    info!(device = ?device, "training device");
    train_with_backend::<Autodiff<Wgpu>>(config, output_model_path, device)
}

/// モデル学習を実行
pub fn train_with_backend<B: AutodiffBackend>(
    config: &AppConfig,
    output_model_path: &Path,
    device: B::Device,
) -> Result<TrainingReport> {
    let (dataset_train, dataset_val) = load_split_datasets(config)?;
    let train_samples = dataset_train.len();
    let val_samples = dataset_val.len();
    info!(train = train_samples, val = val_samples, "datasets ready");

    let model_config = ModelConfig::from_settings(&config.model, config.num_classes());
    let image_size = model_config.image_size;

    let mut model = model_config.init::<B>(&device)?;
    let pretrained = match &config.model.backbone_weights {
        Some(path) => {
            model = model.load_backbone_weights(Path::new(path), &device)?;
            true
        }
        None => {
            warn!("no pretrained backbone weights configured, training from random initialisation");
            false
        }
    };
    if config.model.freeze_backbone {
        model = model.freeze_backbone();
        info!("backbone frozen, training classification head only");
    }

    let batcher_train = ImageBatcher::<B>::new(device.clone(), image_size)
        .with_augmentation(config.augmentation.clone());
    let batcher_val = ImageBatcher::<B::InnerBackend>::new(device.clone(), image_size);

    let training = &config.training;
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(training.batch_size)
        .num_workers(training.num_workers)
        .build(dataset_val);

    // アーティファクトディレクトリ（学習ログ・チェックポイント）
    let artifact_dir = std::env::temp_dir().join("pet_transfer_training");
    std::fs::create_dir_all(&artifact_dir)
        .with_context(|| format!("Failed to create artifact directory: {:?}", artifact_dir))?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    info!(
        epochs = training.num_epochs,
        batch_size = training.batch_size,
        learning_rate = training.learning_rate,
        "starting training"
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(training.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), training.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_val);
    let trained_model = model_trained.model;
    let num_params = trained_model.num_params();
    info!(num_params, "training finished");

    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(trained_model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))?;

    let metadata = ModelMetadata::new(
        config.data.class_names.clone(),
        image_size as u32,
        config.model.backbone_channels.clone(),
        config.model.hidden_units,
        config.model.freeze_backbone,
        pretrained,
        training.num_epochs as u32,
    );
    let model_path = save_model_with_metadata(output_model_path, &metadata, &model_binary)?;
    info!(
        path = %model_path.display(),
        size_mb = format!("{:.2}", model_binary.len() as f64 / 1024.0 / 1024.0),
        "model saved"
    );

    std::fs::remove_dir_all(&artifact_dir).ok();

    Ok(TrainingReport {
        model_path,
        train_samples,
        val_samples,
        num_epochs: training.num_epochs,
        num_params,
    })
}
