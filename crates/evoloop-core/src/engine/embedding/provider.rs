use super::backend::{CancelFlag, InferenceBackend, InferenceError};
use super::{Embedding, RepresentationMode};
use crate::core::io::IoError;
use crate::core::io::table::write_table;
use crate::core::models::sequence::Sequence;
use crate::core::models::variant::Variant;
use crate::engine::cache::{CacheError, RepresentationCache};
use crate::engine::config::EmbeddingConfig;
use crate::engine::progress::{Progress, ProgressReporter};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of embedding a list of variants, aligned with the input order.
#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub embeddings: Vec<Option<Embedding>>,
    /// Input index and reason for every variant without an embedding.
    pub failures: Vec<(usize, InferenceError)>,
    pub hits: usize,
    pub computed: usize,
}

impl EmbedReport {
    pub fn succeeded(&self) -> usize {
        self.embeddings.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|(_, e)| matches!(e, InferenceError::Cancelled))
    }
}

/// Front end to an [`InferenceBackend`] that consults the cache before computing and
/// batches the remaining work.
pub struct EmbeddingProvider<'a> {
    backend: &'a dyn InferenceBackend,
    cache: &'a RepresentationCache,
    config: EmbeddingConfig,
}

impl<'a> EmbeddingProvider<'a> {
    pub fn new(
        backend: &'a dyn InferenceBackend,
        cache: &'a RepresentationCache,
        config: EmbeddingConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            config,
        }
    }

    /// Model identity used in cache keys. Truncation changes the output, so it is part of it.
    pub fn model_id(&self) -> String {
        match self.config.truncate_to {
            Some(limit) => format!("{}@trunc{}", self.backend.model_id(), limit),
            None => self.backend.model_id().to_string(),
        }
    }

    pub fn mode(&self) -> RepresentationMode {
        self.config.mode
    }

    pub fn cache(&self) -> &RepresentationCache {
        self.cache
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    fn effective_length(&self, sequence: &Sequence) -> usize {
        match self.config.truncate_to {
            Some(limit) => sequence.len().min(limit),
            None => sequence.len(),
        }
    }

    /// Embeds `variants`, answering from the cache where possible.
    ///
    /// Per-variant failures are collected in the report. `cancel` is checked before each
    /// backend batch; batches already computed stay cached.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if a store read or an automatic flush fails and store failures
    /// are not tolerated.
    pub fn embed(
        &self,
        variants: &[&Variant],
        cancel: &CancelFlag,
        reporter: &ProgressReporter,
    ) -> Result<EmbedReport, CacheError> {
        let model_id = self.model_id();
        let mode = self.config.mode;
        let mut report = EmbedReport {
            embeddings: vec![None; variants.len()],
            ..Default::default()
        };

        if !self.backend.supports_mode(mode) {
            report.failures = (0..variants.len())
                .map(|i| {
                    (
                        i,
                        InferenceError::UnsupportedMode {
                            model_id: model_id.clone(),
                            mode,
                        },
                    )
                })
                .collect();
            return Ok(report);
        }

        // Distinct missing sequences, each with every input index that needs it.
        let mut slots: HashMap<&Sequence, Vec<usize>> = HashMap::new();
        let mut misses: Vec<(usize, &Variant)> = Vec::new();
        let mut expected_dim: Option<usize> = None;
        for (i, &variant) in variants.iter().enumerate() {
            if let Some(indices) = slots.get_mut(variant.sequence()) {
                indices.push(i);
                continue;
            }
            if let Some(hit) = self.cache.lookup(variant.sequence(), &model_id, mode)? {
                expected_dim.get_or_insert(hit.dim());
                report.embeddings[i] = Some(hit);
                report.hits += 1;
                continue;
            }
            slots.insert(variant.sequence(), vec![i]);
            misses.push((i, variant));
        }
        let limit = self.backend.max_sequence_length();
        let mut failures: Vec<(usize, InferenceError)> = Vec::new();
        let fail = |sequence: &Sequence, error: InferenceError, failures: &mut Vec<_>| {
            for &i in &slots[sequence] {
                failures.push((i, error.clone()));
            }
        };

        let mut runnable = Vec::with_capacity(misses.len());
        for (i, variant) in misses {
            let length = self.effective_length(variant.sequence());
            if length > limit {
                fail(
                    variant.sequence(),
                    InferenceError::SequenceTooLong { length, limit },
                    &mut failures,
                );
            } else {
                runnable.push((i, variant));
            }
        }
        runnable.sort_by_key(|(i, v)| (self.effective_length(v.sequence()), *i));

        let batches = self.plan_batches(&runnable);
        debug!(
            requested = variants.len(),
            hits = report.hits,
            to_compute = runnable.len(),
            batches = batches.len(),
            "Planned embedding batches."
        );

        reporter.report(Progress::TaskStart {
            total_steps: runnable.len() as u64,
        });
        for (batch_index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                let remaining: usize = batches[batch_index..].iter().map(|b| b.len()).sum();
                warn!(remaining, "Embedding cancelled; remaining sequences skipped.");
                for &(_, variant) in batches[batch_index..].iter().flatten() {
                    fail(variant.sequence(), InferenceError::Cancelled, &mut failures);
                }
                break;
            }

            let batch_variants: Vec<&Variant> = batch.iter().map(|(_, v)| *v).collect();
            let results = self.cache.get_or_compute_many(
                &batch_variants,
                &model_id,
                mode,
                |sequences| self.compute(sequences, &mut expected_dim),
            )?;

            for (variant, result) in batch_variants.iter().zip(results) {
                match result {
                    Ok(embedding) => {
                        report.computed += 1;
                        for &i in &slots[variant.sequence()] {
                            report.embeddings[i] = Some(embedding.clone());
                        }
                    }
                    Err(e) => fail(variant.sequence(), e, &mut failures),
                }
            }
            self.cache.flush_if_needed()?;
            reporter.report(Progress::TaskIncrement {
                steps: batch.len() as u64,
            });
        }
        reporter.report(Progress::TaskFinish);

        failures.sort_by_key(|(i, _)| *i);
        report.failures = failures;
        info!(
            model_id = %model_id,
            mode = %mode,
            hits = report.hits,
            computed = report.computed,
            failed = report.failures.len(),
            "Embedding pass finished."
        );
        Ok(report)
    }

    /// Splits work into batches bounded by `batch_size` and, if set, the token budget.
    fn plan_batches<'v>(&self, work: &[(usize, &'v Variant)]) -> Vec<Vec<(usize, &'v Variant)>> {
        let mut batches = Vec::new();
        let mut current: Vec<(usize, &Variant)> = Vec::new();
        let mut tokens = 0;
        for &(i, variant) in work {
            let cost = self.effective_length(variant.sequence()) + 1;
            let over_tokens = self
                .config
                .max_tokens_per_batch
                .is_some_and(|budget| tokens + cost > budget);
            if !current.is_empty() && (current.len() >= self.config.batch_size || over_tokens) {
                batches.push(std::mem::take(&mut current));
                tokens = 0;
            }
            current.push((i, variant));
            tokens += cost;
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    fn compute(
        &self,
        sequences: &[&Sequence],
        expected_dim: &mut Option<usize>,
    ) -> Vec<Result<Embedding, InferenceError>> {
        let truncated: Vec<Sequence> = match self.config.truncate_to {
            Some(limit) => sequences
                .iter()
                .map(|s| Sequence::from_canonical(s.as_str()[..s.len().min(limit)].to_string()))
                .collect(),
            None => sequences.iter().map(|s| (*s).clone()).collect(),
        };
        let refs: Vec<&Sequence> = truncated.iter().collect();
        let outputs = self.backend.infer(&refs, self.config.mode);
        if outputs.len() != refs.len() {
            let message = format!(
                "backend returned {} results for {} sequences",
                outputs.len(),
                refs.len()
            );
            return refs
                .iter()
                .map(|_| {
                    Err(InferenceError::Backend {
                        model_id: self.backend.model_id().to_string(),
                        message: message.clone(),
                    })
                })
                .collect();
        }

        outputs
            .into_iter()
            .map(|output| {
                let embedding = output?.into_pooled()?;
                let expected = *expected_dim.get_or_insert(embedding.dim());
                if embedding.dim() != expected {
                    return Err(InferenceError::DimensionMismatch {
                        expected,
                        found: embedding.dim(),
                    });
                }
                Ok(embedding)
            })
            .collect()
    }
}

/// Writes successfully embedded variants as a table: descriptor, then one column per
/// dimension.
pub fn export_embeddings_csv(
    path: &Path,
    variants: &[&Variant],
    report: &EmbedReport,
) -> Result<usize, IoError> {
    let rows = variants
        .iter()
        .zip(&report.embeddings)
        .filter_map(|(variant, embedding)| {
            embedding
                .as_ref()
                .map(|e| (variant.descriptor(), e.as_slice()))
        });
    write_table(path, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::table::read_table;
    use crate::engine::embedding::Representation;
    use crate::engine::embedding::backends::OneHotBackend;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records every batch it receives; returns `[len, first residue]` vectors.
    struct RecordingBackend {
        limit: usize,
        batches: Mutex<Vec<Vec<String>>>,
        cancel_after_first: Option<CancelFlag>,
    }

    impl RecordingBackend {
        fn new(limit: usize) -> Self {
            Self {
                limit,
                batches: Mutex::new(Vec::new()),
                cancel_after_first: None,
            }
        }
    }

    impl InferenceBackend for RecordingBackend {
        fn model_id(&self) -> &str {
            "recording"
        }

        fn max_sequence_length(&self) -> usize {
            self.limit
        }

        fn infer(
            &self,
            sequences: &[&Sequence],
            _mode: RepresentationMode,
        ) -> Vec<Result<Representation, InferenceError>> {
            self.batches
                .lock()
                .unwrap()
                .push(sequences.iter().map(|s| s.to_string()).collect());
            if let Some(flag) = &self.cancel_after_first {
                flag.cancel();
            }
            sequences
                .iter()
                .map(|s| Ok(Representation::Pooled(vec![s.len() as f32, s.as_bytes()[0] as f32])))
                .collect()
        }
    }

    fn variants(seqs: &[&str]) -> Vec<Variant> {
        seqs.iter()
            .map(|s| Variant::wild_type(&Sequence::parse(s).unwrap()))
            .collect()
    }

    fn config(batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            ..Default::default()
        }
    }

    #[test]
    fn results_are_aligned_with_input_order() {
        let backend = RecordingBackend::new(100);
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(&backend, &cache, config(8));
        let owned = variants(&["CCCC", "AA", "DDD"]);
        let refs: Vec<&Variant> = owned.iter().collect();

        let report = provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();
        let firsts: Vec<f32> = report
            .embeddings
            .iter()
            .map(|e| e.as_ref().unwrap().as_slice()[1])
            .collect();
        assert_eq!(firsts, vec![b'C' as f32, b'A' as f32, b'D' as f32]);
        // sorted by length before batching
        assert_eq!(
            backend.batches.lock().unwrap()[0],
            vec!["AA".to_string(), "DDD".to_string(), "CCCC".to_string()]
        );
    }

    #[test]
    fn store_read_failure_aborts_embedding_when_not_tolerated() {
        let dir = tempdir().unwrap();
        let cache = RepresentationCache::open(&crate::engine::config::CacheConfig {
            path: Some(dir.path().join("c.sqlite")),
            tolerate_store_failure: false,
            flush_threshold: 1000,
        })
        .unwrap();
        cache
            .with_store_ref(|s| s.connection().execute_batch("DROP TABLE embeddings"))
            .unwrap()
            .unwrap();
        let backend = RecordingBackend::new(100);
        let provider = EmbeddingProvider::new(&backend, &cache, config(8));
        let owned = variants(&["AA", "CC"]);
        let refs: Vec<&Variant> = owned.iter().collect();

        let result = provider.embed(&refs, &CancelFlag::new(), &ProgressReporter::new());
        assert!(matches!(result, Err(CacheError::Sqlite(_))));
        assert!(backend.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn second_pass_is_served_from_cache() {
        let backend = RecordingBackend::new(100);
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(&backend, &cache, config(8));
        let owned = variants(&["AA", "CC", "AA"]);
        let refs: Vec<&Variant> = owned.iter().collect();

        let first = provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();
        assert_eq!(first.computed, 2);
        assert_eq!(first.succeeded(), 3);

        let second = provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();
        assert_eq!(second.computed, 0);
        assert_eq!(second.hits, 3);
        assert_eq!(backend.batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn batches_respect_size_and_token_budget() {
        let backend = RecordingBackend::new(100);
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(
            &backend,
            &cache,
            EmbeddingConfig {
                batch_size: 2,
                max_tokens_per_batch: Some(8),
                ..Default::default()
            },
        );
        let owned = variants(&["AAA", "CCC", "DDD", "EEEEEEE"]);
        let refs: Vec<&Variant> = owned.iter().collect();
        provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();
        let batches = backend.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        // AAA+CCC = 8 tokens, DDD alone (EEEEEEE would exceed 8), EEEEEEE alone
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn overlong_sequences_fail_individually() {
        let backend = RecordingBackend::new(3);
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(&backend, &cache, config(8));
        let owned = variants(&["AAA", "CCCCC"]);
        let refs: Vec<&Variant> = owned.iter().collect();
        let report = provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();
        assert!(report.embeddings[0].is_some());
        assert_eq!(
            report.failures,
            vec![(1, InferenceError::SequenceTooLong { length: 5, limit: 3 })]
        );
    }

    #[test]
    fn truncation_avoids_length_failures_and_changes_model_id() {
        let backend = RecordingBackend::new(3);
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(
            &backend,
            &cache,
            EmbeddingConfig {
                truncate_to: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(provider.model_id(), "recording@trunc3");
        let owned = variants(&["CCCCC"]);
        let refs: Vec<&Variant> = owned.iter().collect();
        let report = provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();
        assert_eq!(report.embeddings[0].as_ref().unwrap().as_slice()[0], 3.0);
    }

    #[test]
    fn cancellation_keeps_completed_batches_cached() {
        let cancel = CancelFlag::new();
        let mut backend = RecordingBackend::new(100);
        backend.cancel_after_first = Some(cancel.clone());
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(&backend, &cache, config(1));
        let owned = variants(&["AA", "CCC", "DDDD"]);
        let refs: Vec<&Variant> = owned.iter().collect();

        let report = provider.embed(&refs, &cancel, &ProgressReporter::new()).unwrap();
        assert!(report.was_cancelled());
        assert!(report.embeddings[0].is_some());
        assert_eq!(
            report.failures,
            vec![(1, InferenceError::Cancelled), (2, InferenceError::Cancelled)]
        );
        assert!(cache.contains(owned[0].sequence(), "recording", RepresentationMode::Mean).unwrap());
        assert!(!cache.contains(owned[1].sequence(), "recording", RepresentationMode::Mean).unwrap());
    }

    #[test]
    fn unsupported_mode_fails_every_item() {
        let backend = OneHotBackend::default();
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(
            &backend,
            &cache,
            EmbeddingConfig {
                mode: RepresentationMode::Bos,
                ..Default::default()
            },
        );
        let owned = variants(&["AC"]);
        let refs: Vec<&Variant> = owned.iter().collect();
        let report = provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();
        assert!(matches!(report.failures[0].1, InferenceError::UnsupportedMode { .. }));
    }

    #[test]
    fn export_writes_descriptor_rows() {
        let backend = OneHotBackend::default();
        let cache = RepresentationCache::in_memory();
        let provider = EmbeddingProvider::new(&backend, &cache, config(4));
        let wt = Sequence::parse("AC").unwrap();
        let owned = vec![
            Variant::wild_type(&wt),
            Variant::from_descriptor(&wt, "C2D").unwrap(),
        ];
        let refs: Vec<&Variant> = owned.iter().collect();
        let report = provider
            .embed(&refs, &CancelFlag::new(), &ProgressReporter::new())
            .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("embeddings.csv");
        assert_eq!(export_embeddings_csv(&path, &refs, &report).unwrap(), 2);
        let rows = read_table(&path).unwrap();
        assert_eq!(rows[0].key, "WT");
        assert_eq!(rows[1].key, "C2D");
        assert_eq!(rows[1].values.len(), 40);
    }
}
