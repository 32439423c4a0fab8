//! Collector orchestrator: drives one collection run.
//!
//! 1. Find the distinct pending types for the collector, then record the run
//! 2. Skip requested types with nothing pending
//! 3. For each type, fetch its `language → name → id` view and hand it to the
//!    [`Harvester`], which feeds the [`BatchWriter`] and updates statuses
//! 4. Force-flush, write test-mode output, close the run record

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use harvestline_shared::{
    AppConfig, CollectionStatus, HarvestError, LanguageTargets, Result, expand_home,
};
use harvestline_storage::Storage;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::batch::{BatchWriter, RecordWriter};
use crate::query::{QueryEngine, TargetFilter};
use crate::status::{StatusService, TransitionPolicy};

/// What a harvester gets to work with for one collection type.
pub struct HarvestContext<'c, 'a, W> {
    /// Each harvested payload goes through here.
    pub batch: &'c mut BatchWriter<W>,
    /// For reporting per-target outcomes the writer does not settle itself.
    pub status: &'c StatusService<'a>,
}

/// Source-specific harvesting step, pluggable per collector.
#[allow(async_fn_in_trait)]
pub trait Harvester {
    /// Harvest every target in `items` (`language → name → id`) and return
    /// the collected records.
    async fn collect_and_save<W: RecordWriter>(
        &self,
        items: &LanguageTargets,
        collection_type: &str,
        ctx: &mut HarvestContext<'_, '_, W>,
    ) -> Result<Vec<Value>>;
}

/// Parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub collector: String,
    /// Targets at this status are processed.
    pub status: CollectionStatus,
    /// Restrict to these types.
    pub types: Option<Vec<String>>,
    /// Restrict to these languages.
    pub languages: Option<Vec<String>>,
}

impl RunRequest {
    /// Collect targets that were never collected.
    pub fn collect(collector: impl Into<String>) -> Self {
        Self {
            collector: collector.into(),
            status: CollectionStatus::NotCollected,
            types: None,
            languages: None,
        }
    }

    /// Collect targets that previously failed.
    pub fn retry(collector: impl Into<String>) -> Self {
        Self {
            status: CollectionStatus::Failed,
            ..Self::collect(collector)
        }
    }

    pub fn with_types(mut self, types: Vec<String>) -> Self {
        self.types = Some(types).filter(|t| !t.is_empty());
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = Some(languages).filter(|l| !l.is_empty());
        self
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub collector: String,
    pub status: String,
    pub types_processed: Vec<String>,
    pub types_skipped: Vec<String>,
    pub types_failed: Vec<String>,
    /// Records returned by the harvester.
    pub records: usize,
    /// Items the batch writer counted as saved.
    pub saved: usize,
    pub flushes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub elapsed_ms: u64,
    /// Why the run aborted, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives runs for one collector over injected dependencies.
pub struct Collector<'a, H, W> {
    storage: &'a Storage,
    engine: QueryEngine<'a>,
    status: StatusService<'a>,
    harvester: H,
    batch: BatchWriter<W>,
    local_output_dir: PathBuf,
}

impl<'a, H: Harvester, W: RecordWriter> Collector<'a, H, W> {
    pub fn new(
        storage: &'a Storage,
        harvester: H,
        batch: BatchWriter<W>,
        policy: TransitionPolicy,
        local_output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            engine: QueryEngine::new(storage),
            status: StatusService::new(storage, policy),
            harvester,
            batch,
            local_output_dir: local_output_dir.into(),
        }
    }

    /// Build a collector from the `[batch]` and `[status]` config sections.
    ///
    /// An out-of-range batch size is an [`HarvestError::Initialization`] error.
    pub fn from_config(
        storage: &'a Storage,
        harvester: H,
        writer: W,
        config: &AppConfig,
    ) -> Result<Self> {
        let batch = BatchWriter::from_config(writer, &config.batch)?;
        Ok(Self::new(
            storage,
            harvester,
            batch,
            TransitionPolicy::from(config.status.transitions),
            expand_home(&config.batch.local_output_dir),
        ))
    }

    /// Run one collection pass.
    ///
    /// Unknown collector or status names fail the run before anything is
    /// recorded. A harvester error only fails its own type. Once started,
    /// the run record is always closed, with the error in its stats if the
    /// run aborts.
    #[instrument(skip_all, fields(collector = %request.collector, status = %request.status))]
    pub async fn run(&mut self, request: &RunRequest) -> Result<RunReport> {
        let start = Instant::now();
        let status = request.status.as_str();
        self.batch.reset_for_run();

        let pending = self.engine.distinct_types(&request.collector, status).await?;

        let run_id = match self
            .storage
            .insert_collection_run(&request.collector, status)
            .await
        {
            Ok(id) => Some(id),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "could not record run start");
                None
            }
            Err(e) => return Err(e),
        };

        let mut report = RunReport {
            run_id: run_id.clone(),
            collector: request.collector.clone(),
            status: status.to_string(),
            ..RunReport::default()
        };

        let outcome = self.collect(request, pending, &mut report).await;
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        if let Err(e) = &outcome {
            error!(error = %e, "collection run aborted");
            report.error = Some(e.to_string());
        }

        if let Some(id) = &run_id {
            let stats = serde_json::to_string(&report)?;
            if let Err(e) = self.storage.finish_collection_run(id, &stats).await {
                warn!(run_id = %id, error = %e, "could not record run finish");
            }
        }
        outcome?;

        info!(
            processed = report.types_processed.len(),
            skipped = report.types_skipped.len(),
            failed = report.types_failed.len(),
            records = report.records,
            saved = report.saved,
            elapsed_ms = report.elapsed_ms,
            "collection run complete"
        );
        Ok(report)
    }

    async fn collect(
        &mut self,
        request: &RunRequest,
        pending: Vec<String>,
        report: &mut RunReport,
    ) -> Result<()> {
        let status = request.status.as_str();
        let types = match &request.types {
            Some(requested) => {
                let mut selected = Vec::new();
                for name in requested {
                    if pending.contains(name) {
                        selected.push(name.clone());
                    } else {
                        warn!(collection_type = %name, "requested type has no pending targets, skipping");
                        report.types_skipped.push(name.clone());
                    }
                }
                selected
            }
            None => pending,
        };
        info!(types = types.len(), "starting collection run");

        let mut results = Vec::new();
        for collection_type in &types {
            let filter = match &request.languages {
                Some(languages) => TargetFilter::TypesAndLanguages {
                    types: vec![collection_type.clone()],
                    languages: languages.clone(),
                },
                None => TargetFilter::Types(vec![collection_type.clone()]),
            };
            let mut view = self
                .engine
                .grouped_targets(&request.collector, &filter, status)
                .await?;

            let Some(items) = view.remove(collection_type).filter(|i| !i.is_empty()) else {
                warn!(%collection_type, "no targets to collect, skipping");
                report.types_skipped.push(collection_type.clone());
                continue;
            };

            let mut ctx = HarvestContext {
                batch: &mut self.batch,
                status: &self.status,
            };
            match self
                .harvester
                .collect_and_save(&items, collection_type, &mut ctx)
                .await
            {
                Ok(records) => {
                    info!(%collection_type, records = records.len(), "collected type");
                    results.extend(records);
                    report.types_processed.push(collection_type.clone());
                }
                Err(e) => {
                    error!(%collection_type, error = %e, "harvester failed for type");
                    report.types_failed.push(collection_type.clone());
                }
            }
        }

        self.batch.force_flush("end of run").await;

        report.records = results.len();
        report.saved = self.batch.total_saved();
        report.flushes = self.batch.flush_count();

        if self.batch.is_test_mode() {
            let collected = self.batch.take_collected();
            if !collected.is_empty() {
                let path = write_local_output(&self.local_output_dir, &request.collector, &collected)?;
                report.output_path = Some(path);
            }
        }
        Ok(())
    }

    pub fn batch(&self) -> &BatchWriter<W> {
        &self.batch
    }
}

/// Write test-mode payloads to `<dir>/<collector>_<YYYYmmdd_HHMMSS>.json`.
fn write_local_output(dir: &Path, collector: &str, payloads: &[Value]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;
    let file_name = format!("{collector}_{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(file_name);

    let content = serde_json::to_string_pretty(payloads)?;
    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    info!(path = %path.display(), records = payloads.len(), "wrote local output");
    Ok(path)
}
