//! 転移学習モデルの共通定義
//!
//! 事前学習済みの畳み込みバックボーンに新しい分類ヘッドを付けた
//! モデルと、画像の読み込み・正規化を提供します。

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::{imageops::FilterType, RgbImage};
use std::path::Path;
use tracing::{debug, info};

use crate::model::{InferenceConfig, ModelSettings};

/// ImageNetの平均
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNetの標準偏差
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 畳み込みブロック: Conv 3x3 (same padding) + ReLU + MaxPool 2x2
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

/// バックボーン設定
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// 各ブロックの出力チャネル数
    pub channels: Vec<usize>,
    /// 入力チャネル数（RGB）
    #[config(default = 3)]
    pub in_channels: usize,
}

impl BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let mut blocks = Vec::with_capacity(self.channels.len());
        let mut in_channels = self.in_channels;
        for &out_channels in &self.channels {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        Backbone {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// 特徴ベクトルの次元（最終ブロックのチャネル数）
    pub fn feature_dim(&self) -> usize {
        self.channels.last().copied().unwrap_or(self.in_channels)
    }

    /// 入力サイズの下限（プーリングで 1x1 未満にならない大きさ）
    pub fn min_input_size(&self) -> usize {
        1 << self.channels.len()
    }
}

/// 畳み込みバックボーン
///
/// # アーキテクチャ
/// - {Conv 3x3 (same) + ReLU + MaxPool 2x2} x N
/// - Global Average Pooling
///
/// 出力は [batch_size, 最終チャネル数] の特徴ベクトルです。
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> Backbone<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self
            .blocks
            .iter()
            .fold(images, |x, block| block.forward(x));
        let x = self.pool.forward(x);

        let [_, c, _, _] = x.dims();
        x.reshape([batch_size, c])
    }
}

/// 分類ヘッド
///
/// - FC: features -> hidden + ReLU
/// - Dropout
/// - FC: hidden -> num_classes
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(features);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// バックボーン各ブロックの出力チャネル数
    pub backbone_channels: Vec<usize>,
    /// 分類ヘッドの中間層ユニット数
    #[config(default = 64)]
    pub hidden_units: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// アプリケーション設定から作成
    pub fn from_settings(settings: &ModelSettings, num_classes: usize) -> Self {
        Self::new(num_classes, settings.backbone_channels.clone())
            .with_hidden_units(settings.hidden_units)
            .with_dropout(settings.dropout)
            .with_image_size(settings.image_size)
    }

    /// 推論設定から作成（推論時はドロップアウトなし）
    pub fn from_inference_config(config: &InferenceConfig) -> Self {
        Self::new(config.num_classes(), config.backbone_channels.clone())
            .with_hidden_units(config.hidden_units)
            .with_dropout(0.0)
            .with_image_size(config.image_size)
    }

    pub fn backbone(&self) -> BackboneConfig {
        BackboneConfig::new(self.backbone_channels.clone())
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TransferClassifier<B>> {
        let backbone_config = self.backbone();
        if self.num_classes == 0 {
            anyhow::bail!("model needs at least one class");
        }
        if self.backbone_channels.is_empty() {
            anyhow::bail!("backbone needs at least one conv block");
        }
        if self.image_size < backbone_config.min_input_size() {
            anyhow::bail!(
                "input size {} is too small for {} conv blocks (min {})",
                self.image_size,
                self.backbone_channels.len(),
                backbone_config.min_input_size()
            );
        }

        let feature_dim = backbone_config.feature_dim();
        debug!(
            image_size = self.image_size,
            backbone = ?self.backbone_channels,
            feature_dim,
            hidden_units = self.hidden_units,
            num_classes = self.num_classes,
            "model layout"
        );

        Ok(TransferClassifier {
            backbone: backbone_config.init(device),
            head: ClassifierHead {
                fc1: LinearConfig::new(feature_dim, self.hidden_units).init(device),
                dropout: DropoutConfig::new(self.dropout).init(),
                fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
                activation: Relu::new(),
            },
        })
    }
}

/// 転移学習用の分類モデル（バックボーン + 分類ヘッド）
#[derive(Module, Debug)]
pub struct TransferClassifier<B: Backend> {
    backbone: Backbone<B>,
    head: ClassifierHead<B>,
}

impl<B: Backend> TransferClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    /// クラス確率（softmax）
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 事前学習済みバックボーンの重み（.mpk）を読み込む
    pub fn load_backbone_weights(self, path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let backbone = self
            .backbone
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| anyhow::anyhow!("{:?}", e))
            .with_context(|| format!("Failed to load backbone weights: {:?}", path))?;

        info!(path = %path.display(), "pretrained backbone loaded");
        Ok(Self {
            backbone,
            head: self.head,
        })
    }

    /// バックボーンの重みを .mpk として書き出す
    pub fn save_backbone_weights(&self, path: &Path) -> Result<()> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.backbone
            .clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| anyhow::anyhow!("{:?}", e))
            .with_context(|| format!("Failed to save backbone weights: {:?}", path))
    }

    /// バックボーンを凍結（勾配を計算しない）
    pub fn freeze_backbone(self) -> Self {
        Self {
            backbone: self.backbone.no_grad(),
            head: self.head,
        }
    }
}

/// 画像を読み込み、RGB・指定サイズ（正方形）にする
pub fn load_rgb_image(path: &Path, size: usize) -> Result<RgbImage> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open image: {:?}", path))?
        .to_rgb8();
    let size = size as u32;

    if img.dimensions() == (size, size) {
        Ok(img)
    } else {
        Ok(image::imageops::resize(&img, size, size, FilterType::Triangle))
    }
}

/// ImageNetの平均と標準偏差で正規化
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化
pub fn normalize_image(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * (width * height) as usize);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let value = img.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
            }
        }
    }

    data
}

/// 画像を読み込んで正規化
pub fn load_and_normalize_image(path: &Path, size: usize) -> Result<Vec<f32>> {
    Ok(normalize_image(&load_rgb_image(path, size)?))
}

/// 平坦化済み画像データ（N枚分）をテンソルに変換
pub fn images_to_tensor<B: Backend>(
    pixels: &[f32],
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 1>::from_floats(pixels, device).reshape([batch_size, 3, image_size, image_size])
}
