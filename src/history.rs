use std::fmt::{Display, Formatter};
use std::path::Path;

use crate::error::Result;

/// One point of the learning curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// `epoch + batch / batches` for training steps, `epoch + 1` for validation
    pub epoch: f64,
    pub loss: f64,
    pub accuracy: f64,
}

/// Append-only log of training and validation scores
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    records: Vec<Record>,
}

impl History {
    pub(crate) fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    pub fn epochs(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.epoch).collect()
    }

    pub fn losses(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.loss).collect()
    }

    pub fn accuracies(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.accuracy).collect()
    }

    /// `epoch,loss,accuracy` with a header line
    pub fn to_csv(&self) -> String {
        let mut lines = vec!["epoch,loss,accuracy".to_string()];
        lines.extend(
            self.records
                .iter()
                .map(|r| format!("{},{},{}", r.epoch, r.loss, r.accuracy)),
        );
        lines.join("\n") + "\n"
    }

    ///Save to path as csv
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_csv())?;
        Ok(())
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "epoch {:.3} loss {:.5} accuracy {:.2}%",
            self.epoch,
            self.loss,
            self.accuracy * 100.
        )
    }
}
