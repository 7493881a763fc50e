//! 推論結果テーブルの集計（正解率・混同行列）

use serde::Serialize;

use crate::analysis::prediction::PredictionTable;

/// 混同行列
///
/// `counts[true_label][predicted_label]` にサンプル数を保持します。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// テーブルから集計（範囲外のクラスIDは無視）
    pub fn from_table(table: &PredictionTable, num_classes: usize) -> Self {
        let mut counts = vec![vec![0usize; num_classes]; num_classes];
        for (_, record) in table.iter() {
            if record.true_label < num_classes && record.predicted_label < num_classes {
                counts[record.true_label][record.predicted_label] += 1;
            }
        }
        Self { counts }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, true_label: usize, predicted_label: usize) -> usize {
        self.counts
            .get(true_label)
            .and_then(|row| row.get(predicted_label))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// 正解率（サンプルが無い場合は 0.0）
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.num_classes()).map(|i| self.counts[i][i]).sum();
        correct as f64 / total as f64
    }

    /// クラスごとの再現率（そのクラスの正解サンプルが無い場合は None）
    pub fn recall(&self, label: usize) -> Option<f64> {
        let row = self.counts.get(label)?;
        let support: usize = row.iter().sum();
        (support > 0).then(|| row[label] as f64 / support as f64)
    }

    /// クラスごとの適合率（そのクラスへの予測が無い場合は None）
    pub fn precision(&self, label: usize) -> Option<f64> {
        if label >= self.num_classes() {
            return None;
        }
        let predicted: usize = self.counts.iter().map(|row| row[label]).sum();
        (predicted > 0).then(|| self.counts[label][label] as f64 / predicted as f64)
    }

    /// クラスごとの正解サンプル数
    pub fn support(&self, label: usize) -> usize {
        self.counts.get(label).map(|row| row.iter().sum()).unwrap_or(0)
    }

    /// クラスごとの適合率・再現率の一覧（値が無い場合は `-`）
    pub fn class_report(&self, class_names: &[String]) -> String {
        let width = self.name_width(class_names);
        let value = |v: Option<f64>| v.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string());

        let mut out = format!(
            "{:width$} {:>9} {:>9} {:>9}\n",
            "class", "precision", "recall", "support",
            width = width
        );
        for i in 0..self.num_classes() {
            out.push_str(&format!(
                "{:width$} {:>9} {:>9} {:>9}\n",
                class_name(class_names, i),
                value(self.precision(i)),
                value(self.recall(i)),
                self.support(i),
                width = width
            ));
        }
        out
    }

    /// 表形式の文字列（行: 正解, 列: 予測）
    pub fn render(&self, class_names: &[String]) -> String {
        let name = |i: usize| class_name(class_names, i);
        let width = self.name_width(class_names);

        let mut out = format!("{:width$}", "true\\pred", width = width);
        for i in 0..self.num_classes() {
            out.push_str(&format!(" {:>width$}", name(i), width = width));
        }
        out.push('\n');
        for (i, row) in self.counts.iter().enumerate() {
            out.push_str(&format!("{:width$}", name(i), width = width));
            for count in row {
                out.push_str(&format!(" {:>width$}", count, width = width));
            }
            out.push('\n');
        }
        out
    }

    fn name_width(&self, class_names: &[String]) -> usize {
        (0..self.num_classes())
            .map(|i| class_name(class_names, i).len())
            .max()
            .unwrap_or(0)
            .max(9)
    }
}

fn class_name(class_names: &[String], index: usize) -> String {
    class_names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::prediction::PredictionRecord;

    fn sample_table() -> PredictionTable {
        vec![
            (0, PredictionRecord::new(0.9, 0, 0)),
            (1, PredictionRecord::new(0.8, 1, 0)),
            (2, PredictionRecord::new(0.7, 1, 1)),
            (3, PredictionRecord::new(0.6, 1, 1)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_confusion_counts() {
        let cm = ConfusionMatrix::from_table(&sample_table(), 2);
        assert_eq!(cm.count(0, 0), 1);
        assert_eq!(cm.count(0, 1), 1);
        assert_eq!(cm.count(1, 1), 2);
        assert_eq!(cm.count(1, 0), 0);
        assert_eq!(cm.total(), 4);
    }

    #[test]
    fn test_accuracy_precision_recall() {
        let cm = ConfusionMatrix::from_table(&sample_table(), 2);
        assert!((cm.accuracy() - 0.75).abs() < 1e-9);
        assert_eq!(cm.recall(0), Some(0.5));
        assert_eq!(cm.precision(0), Some(1.0));
        assert!((cm.precision(1).unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(cm.precision(5), None);
    }

    #[test]
    fn test_empty_table() {
        let cm = ConfusionMatrix::from_table(&PredictionTable::default(), 2);
        assert_eq!(cm.accuracy(), 0.0);
        assert_eq!(cm.recall(0), None);
    }

    #[test]
    fn test_class_report() {
        let cm = ConfusionMatrix::from_table(&sample_table(), 3);
        let names = ["cat".to_string(), "dog".to_string(), "bird".to_string()];
        let report = cm.class_report(&names);
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(cm.support(0), 2);
        let cat: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(cat, vec!["cat", "1.0000", "0.5000", "2"]);
        let bird: Vec<&str> = lines[3].split_whitespace().collect();
        assert_eq!(bird, vec!["bird", "-", "-", "0"]);
    }

    #[test]
    fn test_render() {
        let cm = ConfusionMatrix::from_table(&sample_table(), 2);
        let text = cm.render(&["cat".to_string(), "dog".to_string()]);
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().starts_with("cat"));
    }
}
