//! 推論結果のランキング（誤分類の分析用）
//!
//! 推論結果テーブルから、指定クラスに予測されたサンプルを確信度順に並べ、
//! 先頭N件を取り出します。結果は画像グリッド表示側にそのまま渡せるよう、
//! 見出しメッセージと共に [`RankedSelection`] として返します。

use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;

use crate::analysis::prediction::{PredictionRecord, PredictionTable};

/// 確信度の並び順
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    /// 確信度の高い順
    Highest,
    /// 確信度の低い順
    Lowest,
}

impl RankOrder {
    pub fn from_want_highest(want_highest: bool) -> Self {
        if want_highest {
            RankOrder::Highest
        } else {
            RankOrder::Lowest
        }
    }

    fn compare(self, a: f32, b: f32) -> Ordering {
        match self {
            RankOrder::Highest => b.total_cmp(&a),
            RankOrder::Lowest => a.total_cmp(&b),
        }
    }
}

/// ランキング条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankQuery {
    /// 対象とする予測クラスID
    pub target_label: usize,
    pub order: RankOrder,
    /// 誤分類のみを対象にする
    pub only_errors: bool,
    /// 最大件数
    pub limit: usize,
}

impl RankQuery {
    pub fn new(target_label: usize, order: RankOrder, only_errors: bool, limit: usize) -> Self {
        Self {
            target_label,
            order,
            only_errors,
            limit,
        }
    }

    /// 条件に一致するかどうか
    fn matches(&self, record: &PredictionRecord) -> bool {
        record.predicted_label == self.target_label
            && !(self.only_errors && record.is_correct())
    }

    /// テーブルに適用して順位付きの一覧を返す
    pub fn apply(&self, table: &PredictionTable) -> Vec<(usize, PredictionRecord)> {
        let mut matched: Vec<(usize, PredictionRecord)> = table
            .iter()
            .filter(|(_, record)| self.matches(record))
            .map(|(index, record)| (index, *record))
            .collect();

        sort_by_confidence(&mut matched, self.order);
        matched.truncate(self.limit);
        matched
    }

    /// 表示用の見出し
    pub fn message(&self, class_name: &str) -> String {
        let class_name = pluralize(class_name);
        match (self.only_errors, self.order) {
            (false, RankOrder::Highest) => {
                format!("Images with highest probability of containing {}", class_name)
            }
            (false, RankOrder::Lowest) => {
                format!("Images with lowest probability of containing {}", class_name)
            }
            (true, RankOrder::Highest) => {
                format!("Images wrongly predicted as {} with highest confidence", class_name)
            }
            (true, RankOrder::Lowest) => {
                format!("Images wrongly predicted as {} with lowest confidence", class_name)
            }
        }
    }

    /// テーブルに適用し、見出し付きの結果を返す
    pub fn select(&self, table: &PredictionTable, class_name: &str) -> RankedSelection {
        RankedSelection {
            message: self.message(class_name),
            query: Some(*self),
            entries: self.apply(table),
        }
    }
}

/// 見出しとランキング結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSelection {
    pub message: String,
    /// `least_confident` のようにクラスを問わない選択では None
    pub query: Option<RankQuery>,
    pub entries: Vec<(usize, PredictionRecord)>,
}

impl RankedSelection {
    /// インデックスを画像パスに解決した表示用の形にする
    pub fn with_paths<F>(&self, path_of: F) -> RankedImages
    where
        F: Fn(usize) -> Option<PathBuf>,
    {
        RankedImages {
            message: self.message.clone(),
            query: self.query,
            images: self
                .entries
                .iter()
                .map(|&(index, record)| RankedImage {
                    index,
                    path: path_of(index),
                    record,
                })
                .collect(),
        }
    }
}

/// 画像パス付きのランキング結果（表示・書き出し用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedImages {
    pub message: String,
    pub query: Option<RankQuery>,
    pub images: Vec<RankedImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedImage {
    pub index: usize,
    /// 対応する画像が無い場合は None
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub record: PredictionRecord,
}

/// 指定クラスに予測されたサンプルを確信度順に並べ、先頭 `limit` 件を返す
///
/// - `want_highest`: true なら確信度の高い順、false なら低い順
/// - `only_errors`: true なら予測と正解が異なるものだけ
///
/// 確信度が同じ場合はインデックスの小さい順です。どのサンプルも
/// `target_label` に予測されていなければ空の結果を返します。
pub fn rank(
    table: &PredictionTable,
    target_label: usize,
    want_highest: bool,
    only_errors: bool,
    limit: usize,
) -> Vec<(usize, PredictionRecord)> {
    RankQuery::new(
        target_label,
        RankOrder::from_want_highest(want_highest),
        only_errors,
        limit,
    )
    .apply(table)
}

/// 予測クラスを問わず、確信度の低い（モデルが迷った）サンプルを返す
pub fn least_confident(table: &PredictionTable, limit: usize) -> RankedSelection {
    let mut entries: Vec<(usize, PredictionRecord)> =
        table.iter().map(|(index, record)| (index, *record)).collect();
    sort_by_confidence(&mut entries, RankOrder::Lowest);
    entries.truncate(limit);

    RankedSelection {
        message: "Images the model was least confident about".to_string(),
        query: None,
        entries,
    }
}

/// 誤分類分析の定番クエリ一式
///
/// クラスごとに「確信度が高い」「確信度が低い」「誤分類で確信度が高い」の3種。
pub fn standard_queries(num_classes: usize, limit: usize) -> Vec<RankQuery> {
    (0..num_classes)
        .flat_map(|label| {
            [
                RankQuery::new(label, RankOrder::Highest, false, limit),
                RankQuery::new(label, RankOrder::Lowest, false, limit),
                RankQuery::new(label, RankOrder::Highest, true, limit),
            ]
        })
        .collect()
}

fn sort_by_confidence(entries: &mut [(usize, PredictionRecord)], order: RankOrder) {
    entries.sort_by(|(ia, a), (ib, b)| {
        order
            .compare(a.confidence, b.confidence)
            .then_with(|| ia.cmp(ib))
    });
}

fn pluralize(class_name: &str) -> String {
    if class_name.ends_with('s') {
        class_name.to_string()
    } else {
        format!("{}s", class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(usize, f32, usize, usize)]) -> PredictionTable {
        rows.iter()
            .map(|&(i, c, p, t)| (i, PredictionRecord::new(c, p, t)))
            .collect()
    }

    fn indices(entries: &[(usize, PredictionRecord)]) -> Vec<usize> {
        entries.iter().map(|(i, _)| *i).collect()
    }

    #[test]
    fn test_rank_highest_first() {
        let t = table(&[(0, 0.9, 1, 1), (1, 0.2, 1, 0)]);
        assert_eq!(indices(&rank(&t, 1, true, false, 10)), vec![0, 1]);
        assert_eq!(indices(&rank(&t, 1, false, false, 10)), vec![1, 0]);
    }

    #[test]
    fn test_rank_filters_by_predicted_label() {
        let t = table(&[(0, 0.9, 0, 0), (1, 0.8, 1, 1), (2, 0.7, 0, 1)]);
        assert_eq!(indices(&rank(&t, 0, true, false, 10)), vec![0, 2]);
    }

    #[test]
    fn test_rank_only_errors() {
        let t = table(&[(0, 0.9, 1, 1), (1, 0.2, 1, 0), (2, 0.6, 1, 0)]);
        let result = rank(&t, 1, true, true, 10);
        assert_eq!(indices(&result), vec![2, 1]);
        assert!(result.iter().all(|(_, r)| !r.is_correct()));
    }

    #[test]
    fn test_rank_ties_by_index() {
        let t = table(&[(5, 0.5, 0, 0), (2, 0.5, 0, 0), (9, 0.5, 0, 0)]);
        assert_eq!(indices(&rank(&t, 0, true, false, 10)), vec![2, 5, 9]);
        assert_eq!(indices(&rank(&t, 0, false, false, 10)), vec![2, 5, 9]);
    }

    #[test]
    fn test_rank_limit() {
        let t = table(&[(0, 0.1, 0, 0), (1, 0.2, 0, 0), (2, 0.3, 0, 0)]);
        assert_eq!(indices(&rank(&t, 0, true, false, 2)), vec![2, 1]);
        assert!(rank(&t, 0, true, false, 0).is_empty());
    }

    #[test]
    fn test_rank_empty_and_unknown_label() {
        let empty = PredictionTable::default();
        assert!(rank(&empty, 0, true, false, 5).is_empty());

        let t = table(&[(0, 0.9, 1, 1)]);
        assert!(rank(&t, 7, true, false, 5).is_empty());
    }

    #[test]
    fn test_messages() {
        let q = RankQuery::new(1, RankOrder::Highest, false, 10);
        assert_eq!(q.message("dog"), "Images with highest probability of containing dogs");

        let q = RankQuery::new(0, RankOrder::Lowest, true, 10);
        assert_eq!(q.message("cat"), "Images wrongly predicted as cats with lowest confidence");
    }

    #[test]
    fn test_least_confident() {
        let t = table(&[(0, 0.9, 1, 1), (1, 0.51, 0, 1), (2, 0.6, 1, 0)]);
        let selection = least_confident(&t, 2);
        assert_eq!(indices(&selection.entries), vec![1, 2]);
        assert!(selection.query.is_none());
    }

    #[test]
    fn test_with_paths() {
        let t = table(&[(0, 0.9, 1, 1), (1, 0.2, 1, 0)]);
        let selection = RankQuery::new(1, RankOrder::Lowest, false, 10).select(&t, "dog");
        let images = selection.with_paths(|i| (i == 1).then(|| PathBuf::from("val/cat/b.jpg")));

        assert_eq!(images.message, selection.message);
        assert_eq!(images.images[0].index, 1);
        assert_eq!(images.images[0].path, Some(PathBuf::from("val/cat/b.jpg")));
        assert_eq!(images.images[1].path, None);

        let json = serde_json::to_value(&images).unwrap();
        let first = &json["images"][0];
        assert_eq!(first["path"], "val/cat/b.jpg");
        assert_eq!(first["predicted_label"], 1);
        assert_eq!(first["true_label"], 0);
        assert_eq!(json["query"]["order"], "lowest");
    }

    #[test]
    fn test_standard_queries() {
        let queries = standard_queries(2, 5);
        assert_eq!(queries.len(), 6);
        assert!(queries.iter().all(|q| q.limit == 5));
        assert_eq!(queries.iter().filter(|q| q.only_errors).count(), 2);
    }
}
