//! 犬猫画像分類の転移学習
//!
//! データセットの展開・分割、事前学習済みバックボーン + 新しい分類ヘッドの学習、
//! モデルの保存・読み込み、推論、推論結果のランキングによる誤分類分析を提供します。
#![recursion_limit = "256"]

pub mod analysis;
pub mod dataset;
pub mod model;
#[cfg(feature = "ml")]
pub mod ml;

pub use analysis::{rank, PredictionRecord, PredictionTable, RankQuery, RankedSelection};
pub use model::AppConfig;
