use crate::data::Measurement;

/// 单批最大条数（一次刷盘 / 一次同步提交）。
pub const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("batch is empty")]
    Empty,
    #[error("batch too large: {len} > {max}")]
    TooLarge { len: usize, max: usize },
}

/// 有序、有上限的一组读数。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    items: Vec<Measurement>,
}

impl Batch {
    pub fn new(items: Vec<Measurement>) -> Result<Self, BatchError> {
        if items.is_empty() {
            return Err(BatchError::Empty);
        }
        if items.len() > MAX_BATCH_SIZE {
            return Err(BatchError::TooLarge {
                len: items.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(Self { items })
    }

    /// 按顺序切分为多个批次，每批不超过 `max`（同时受 [`MAX_BATCH_SIZE`] 约束）。
    pub fn split(items: Vec<Measurement>, max: usize) -> Vec<Batch> {
        let max = max.clamp(1, MAX_BATCH_SIZE);
        if items.is_empty() {
            return Vec::new();
        }
        let mut batches = Vec::with_capacity(items.len().div_ceil(max));
        let mut iter = items.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<Measurement> = iter.by_ref().take(max).collect();
            batches.push(Batch { items: chunk });
        }
        batches
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Measurement] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Measurement> {
        self.items
    }
}
