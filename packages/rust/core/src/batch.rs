//! Batched write-back of harvested payloads.
//!
//! [`BatchWriter`] buffers `(payload, target id, language)` items and hands
//! them to a [`RecordWriter`] grouped by `(target id, language)`, either when
//! the buffer reaches the batch size or when forced at a run boundary.

use std::collections::BTreeMap;

use harvestline_shared::{
    Accounting, BatchConfig, HarvestError, MAX_BATCH_SIZE, MIN_BATCH_SIZE, Result, TargetId,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Persists one group of payloads belonging to a single target and language.
#[allow(async_fn_in_trait)]
pub trait RecordWriter {
    /// Returns how many payloads were actually saved.
    async fn write_group(
        &self,
        payloads: &[Value],
        target_id: TargetId,
        language_code: &str,
    ) -> Result<usize>;
}

/// One buffered payload awaiting a flush.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub payload: Value,
    pub target_id: TargetId,
    pub language_code: String,
}

/// Run-local buffer in front of a [`RecordWriter`].
pub struct BatchWriter<W> {
    writer: W,
    batch_size: usize,
    save_to_database: bool,
    accounting: Accounting,
    buffer: Vec<BatchItem>,
    collected: Vec<Value>,
    total_saved: usize,
    flush_count: usize,
}

impl<W: RecordWriter> BatchWriter<W> {
    /// Build a writer. A batch size outside the accepted range is an
    /// [`HarvestError::Initialization`] error.
    pub fn new(
        writer: W,
        batch_size: u32,
        save_to_database: bool,
        accounting: Accounting,
    ) -> Result<Self> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(HarvestError::Initialization(format!(
                "batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }
        Ok(Self {
            writer,
            batch_size: batch_size as usize,
            save_to_database,
            accounting,
            buffer: Vec::new(),
            collected: Vec::new(),
            total_saved: 0,
            flush_count: 0,
        })
    }

    pub fn from_config(writer: W, config: &BatchConfig) -> Result<Self> {
        Self::new(
            writer,
            config.batch_size,
            config.save_to_database,
            config.accounting,
        )
    }

    /// Queue one payload, flushing when the buffer reaches the batch size.
    ///
    /// In test mode the payload is only kept in memory. Items without a
    /// positive target id are logged and dropped.
    pub async fn add(&mut self, payload: Value, target_id: TargetId, language_code: &str) {
        if !self.save_to_database {
            self.collected.push(payload);
            return;
        }

        if target_id <= 0 {
            warn!(target_id, language_code, "dropping item without a target id");
            return;
        }

        self.buffer.push(BatchItem {
            payload,
            target_id,
            language_code: language_code.to_string(),
        });

        if self.buffer.len() >= self.batch_size {
            self.flush().await;
        }
    }

    /// Write every buffered group and clear the buffer.
    ///
    /// Returns the number of items counted as saved by this flush. Failed
    /// groups are logged; the buffer is cleared regardless.
    pub async fn flush(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }

        let items = std::mem::take(&mut self.buffer);
        let item_count = items.len();

        let mut groups: BTreeMap<(TargetId, String), Vec<Value>> = BTreeMap::new();
        for item in items {
            groups
                .entry((item.target_id, item.language_code))
                .or_default()
                .push(item.payload);
        }

        let mut saved = 0usize;
        for ((target_id, language_code), payloads) in &groups {
            match self
                .writer
                .write_group(payloads, *target_id, language_code)
                .await
            {
                Ok(written) => {
                    saved += match self.accounting {
                        Accounting::Optimistic => payloads.len(),
                        Accounting::Exact => written.min(payloads.len()),
                    };
                }
                Err(e) => {
                    error!(target_id, %language_code, error = %e, "failed to write batch group");
                }
            }
        }

        self.total_saved += saved;
        self.flush_count += 1;
        info!(
            items = item_count,
            groups = groups.len(),
            saved,
            total_saved = self.total_saved,
            "flushed batch"
        );
        saved
    }

    /// Flush regardless of the batch size. No-op in test mode or when empty.
    pub async fn force_flush(&mut self, reason: &str) -> usize {
        if !self.save_to_database || self.buffer.is_empty() {
            return 0;
        }
        debug!(reason, pending = self.buffer.len(), "forcing flush");
        self.flush().await
    }

    /// Drop all run-local state before a new run.
    pub fn reset_for_run(&mut self) {
        if !self.buffer.is_empty() {
            warn!(discarded = self.buffer.len(), "discarding unflushed items from previous run");
        }
        self.buffer.clear();
        self.collected.clear();
        self.total_saved = 0;
        self.flush_count = 0;
    }

    /// Take the payloads kept in test mode.
    pub fn take_collected(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.collected)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn total_saved(&self) -> usize {
        self.total_saved
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    pub fn is_test_mode(&self) -> bool {
        !self.save_to_database
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// Records every group it receives.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub groups: Mutex<Vec<(TargetId, String, usize)>>,
        /// Groups for this target fail.
        pub fail_target: Option<TargetId>,
        /// Report one fewer item than received.
        pub short_count: bool,
    }

    impl RecordWriter for RecordingWriter {
        async fn write_group(
            &self,
            payloads: &[Value],
            target_id: TargetId,
            language_code: &str,
        ) -> Result<usize> {
            if self.fail_target == Some(target_id) {
                return Err(HarvestError::Storage("write failed".into()));
            }
            self.groups
                .lock()
                .unwrap()
                .push((target_id, language_code.to_string(), payloads.len()));
            Ok(if self.short_count {
                payloads.len().saturating_sub(1)
            } else {
                payloads.len()
            })
        }
    }

    fn writer(batch_size: u32) -> BatchWriter<RecordingWriter> {
        BatchWriter::new(RecordingWriter::default(), batch_size, true, Accounting::Optimistic)
            .unwrap()
    }

    #[tokio::test]
    async fn threshold_three_five_items_two_groups() {
        let mut batch = writer(3);
        let items = [(1, "en"), (2, "fr"), (1, "en"), (2, "fr"), (1, "en")];

        for (i, (target, lang)) in items.iter().enumerate() {
            batch.add(json!({ "n": i }), *target, lang).await;
            if i < 2 {
                assert_eq!(batch.flush_count(), 0);
            }
        }
        // One automatic flush after the third add.
        assert_eq!(batch.flush_count(), 1);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            *batch.writer().groups.lock().unwrap(),
            vec![(1, "en".to_string(), 2), (2, "fr".to_string(), 1)]
        );

        assert_eq!(batch.force_flush("end of run").await, 2);
        assert!(batch.is_empty());
        assert_eq!(batch.total_saved(), 5);
        assert_eq!(batch.writer().groups.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn automatic_flushes_are_floor_n_over_t() {
        for (n, t) in [(10usize, 3u32), (9, 3), (2, 5), (7, 1)] {
            let mut batch = writer(t);
            for i in 0..n {
                batch.add(json!(i), (i % 2 + 1) as i64, "en").await;
                assert!(batch.len() < t as usize);
            }
            assert_eq!(batch.flush_count(), n / t as usize);
            assert_eq!(batch.len(), n % t as usize);

            batch.force_flush("drain").await;
            assert_eq!(batch.len(), 0);
            assert_eq!(batch.total_saved(), n);
        }
    }

    #[tokio::test]
    async fn failed_group_is_dropped_and_buffer_cleared() {
        let inner = RecordingWriter {
            fail_target: Some(2),
            ..RecordingWriter::default()
        };
        let mut batch = BatchWriter::new(inner, 10, true, Accounting::Optimistic).unwrap();
        batch.add(json!("a"), 1, "en").await;
        batch.add(json!("b"), 2, "en").await;
        batch.add(json!("c"), 2, "en").await;

        assert_eq!(batch.flush().await, 1);
        assert!(batch.is_empty());
        assert_eq!(batch.total_saved(), 1);
    }

    #[tokio::test]
    async fn exact_accounting_uses_writer_count() {
        let inner = RecordingWriter {
            short_count: true,
            ..RecordingWriter::default()
        };
        let mut batch = BatchWriter::new(inner, 10, true, Accounting::Exact).unwrap();
        for name in ["a", "b", "c"] {
            batch.add(json!(name), 7, "de").await;
        }
        batch.force_flush("done").await;
        assert_eq!(batch.total_saved(), 2);
    }

    #[tokio::test]
    async fn test_mode_keeps_payloads_in_memory() {
        let mut batch =
            BatchWriter::new(RecordingWriter::default(), 1, false, Accounting::Optimistic).unwrap();
        batch.add(json!({"title": "Dog"}), 1, "en").await;
        batch.add(json!({"title": "Cat"}), 0, "en").await;

        assert!(batch.is_test_mode());
        assert!(batch.is_empty());
        assert_eq!(batch.force_flush("noop").await, 0);
        assert!(batch.writer().groups.lock().unwrap().is_empty());
        assert_eq!(batch.take_collected().len(), 2);
    }

    #[tokio::test]
    async fn items_without_target_are_dropped() {
        let mut batch = writer(2);
        batch.add(json!("x"), 0, "en").await;
        batch.add(json!("y"), -3, "en").await;
        assert!(batch.is_empty());
        assert_eq!(batch.flush_count(), 0);
        assert_eq!(batch.force_flush("empty").await, 0);
    }

    #[tokio::test]
    async fn reset_clears_run_state() {
        let mut batch = writer(2);
        batch.add(json!(1), 1, "en").await;
        batch.add(json!(2), 1, "en").await;
        batch.add(json!(3), 1, "en").await;
        batch.reset_for_run();
        assert!(batch.is_empty());
        assert_eq!(batch.total_saved(), 0);
        assert_eq!(batch.flush_count(), 0);
    }

    #[test]
    fn batch_size_out_of_range_is_initialization_error() {
        for size in [0, MAX_BATCH_SIZE + 1] {
            let result =
                BatchWriter::new(RecordingWriter::default(), size, true, Accounting::Optimistic);
            assert!(matches!(result, Err(HarvestError::Initialization(_))));
        }
    }

    #[test]
    fn from_config_carries_every_batch_setting() {
        let config = BatchConfig {
            batch_size: 7,
            save_to_database: false,
            accounting: Accounting::Exact,
            local_output_dir: "out".into(),
        };
        let batch = BatchWriter::from_config(RecordingWriter::default(), &config).unwrap();
        assert_eq!(batch.batch_size, 7);
        assert_eq!(batch.accounting, Accounting::Exact);
        assert!(batch.is_test_mode());

        let invalid = BatchConfig {
            batch_size: 0,
            ..BatchConfig::default()
        };
        assert!(matches!(
            BatchWriter::from_config(RecordingWriter::default(), &invalid),
            Err(HarvestError::Initialization(_))
        ));
    }
}
