use std::collections::BTreeMap;

/// Named indicator columns aligned to one bar sequence.
///
/// Every column has the same length as the bars it was computed from;
/// entries are `None` until the column's lookback window is satisfied.
#[derive(Debug, Clone, Default)]
pub struct IndicatorFrame {
    len: usize,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl IndicatorFrame {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            columns: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, name: &str, column: Vec<Option<f64>>) {
        assert_eq!(
            column.len(),
            self.len,
            "indicator column '{name}' must align to the bar sequence"
        );
        self.columns.insert(name.to_string(), column);
    }

    /// Value of `name` at `index`; `None` when the column is missing or
    /// the lookback has not filled at that index.
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.columns.get(name).and_then(|c| c.get(index).copied())?
    }

    /// Value at the latest bar.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.len.checked_sub(1).and_then(|i| self.value(name, i))
    }

    /// Value at the bar before the latest, for cross detection.
    pub fn previous(&self, name: &str) -> Option<f64> {
        self.len.checked_sub(2).and_then(|i| self.value(name, i))
    }

    /// Column names present in the frame, for diagnostics.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_and_previous_read_the_tail() {
        let mut frame = IndicatorFrame::new(3);
        frame.insert("x", vec![None, Some(1.0), Some(2.0)]);
        assert_eq!(frame.latest("x"), Some(2.0));
        assert_eq!(frame.previous("x"), Some(1.0));
        assert_eq!(frame.value("x", 0), None);
    }

    #[test]
    fn missing_column_reads_none() {
        let frame = IndicatorFrame::new(3);
        assert_eq!(frame.latest("nope"), None);
    }

    #[test]
    #[should_panic(expected = "must align")]
    fn misaligned_column_panics() {
        let mut frame = IndicatorFrame::new(3);
        frame.insert("x", vec![None, None]);
    }
}
