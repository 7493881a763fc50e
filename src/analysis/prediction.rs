//! 推論結果テーブル
//!
//! 検証データ1サンプルごとの (確信度, 予測クラス, 正解クラス) を
//! サンプルインデックスをキーとして保持します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 1サンプル分の推論結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// 予測クラスの確率（クラス確率の最大値）
    pub confidence: f32,
    /// 予測クラスID
    pub predicted_label: usize,
    /// 正解クラスID
    pub true_label: usize,
}

impl PredictionRecord {
    pub fn new(confidence: f32, predicted_label: usize, true_label: usize) -> Self {
        Self {
            confidence,
            predicted_label,
            true_label,
        }
    }

    /// クラス確率ベクトルから作成
    ///
    /// 最大確率が同値の場合は小さいクラスIDを採用します。
    pub fn from_probabilities(probabilities: &[f32], true_label: usize) -> Result<Self> {
        let (predicted_label, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, best_p)) if p <= best_p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| anyhow::anyhow!("empty probability vector"))?;

        Ok(Self::new(confidence, predicted_label, true_label))
    }

    pub fn is_correct(&self) -> bool {
        self.predicted_label == self.true_label
    }
}

/// サンプルインデックス -> 推論結果
///
/// 推論1回につき1度だけ構築し、以降は読み取り専用です。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionTable {
    records: BTreeMap<usize, PredictionRecord>,
}

impl PredictionTable {
    /// クラス確率ベクトル列と正解ラベル列（同じインデックス順）から構築
    pub fn from_probabilities(probabilities: &[Vec<f32>], true_labels: &[usize]) -> Result<Self> {
        if probabilities.len() != true_labels.len() {
            anyhow::bail!(
                "prediction count ({}) does not match label count ({})",
                probabilities.len(),
                true_labels.len()
            );
        }

        let records = probabilities
            .iter()
            .zip(true_labels)
            .enumerate()
            .map(|(index, (probs, &truth))| {
                PredictionRecord::from_probabilities(probs, truth)
                    .map(|record| (index, record))
                    .with_context(|| format!("invalid prediction for sample {}", index))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PredictionRecord> {
        self.records.get(&index)
    }

    /// インデックス昇順で走査
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PredictionRecord)> + '_ {
        self.records.iter().map(|(index, record)| (*index, record))
    }

    /// CSV形式で書き出す（index, confidence, predicted_label, true_label）
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["index", "confidence", "predicted_label", "true_label"])?;
        for (index, record) in self.iter() {
            writer.write_record(&[
                index.to_string(),
                format!("{:.6}", record.confidence),
                record.predicted_label.to_string(),
                record.true_label.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl FromIterator<(usize, PredictionRecord)> for PredictionTable {
    fn from_iter<T: IntoIterator<Item = (usize, PredictionRecord)>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_probabilities() {
        let record = PredictionRecord::from_probabilities(&[0.3, 0.7], 0).unwrap();
        assert_eq!(record.predicted_label, 1);
        assert_eq!(record.confidence, 0.7);
        assert!(!record.is_correct());
    }

    #[test]
    fn test_record_tie_prefers_lower_class() {
        let record = PredictionRecord::from_probabilities(&[0.5, 0.5], 1).unwrap();
        assert_eq!(record.predicted_label, 0);
    }

    #[test]
    fn test_record_empty_probabilities() {
        assert!(PredictionRecord::from_probabilities(&[], 0).is_err());
    }

    #[test]
    fn test_table_from_probabilities() {
        let probs = vec![vec![0.9, 0.1], vec![0.2, 0.8], vec![0.6, 0.4]];
        let table = PredictionTable::from_probabilities(&probs, &[0, 0, 1]).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), Some(&PredictionRecord::new(0.8, 1, 0)));
        let indices: Vec<usize> = table.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_table_length_mismatch() {
        let probs = vec![vec![0.9, 0.1]];
        assert!(PredictionTable::from_probabilities(&probs, &[0, 1]).is_err());
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        let table: PredictionTable = vec![(0, PredictionRecord::new(0.75, 1, 1))]
            .into_iter()
            .collect();

        table.write_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("index,confidence,predicted_label,true_label"));
        assert_eq!(lines.next(), Some("0,0.750000,1,1"));
    }
}
