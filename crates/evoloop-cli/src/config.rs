use crate::cache_dir::CacheLocation;
use crate::error::{CliError, Result};
use crate::utils::parser;
use evoloop::core::io::labels::read_variant_keys;
use evoloop::core::models::residue::Alphabet;
use evoloop::core::models::sequence::Sequence;
use evoloop::core::mutants::{Candidate, MutationPolicy, SiteSubstitutions};
use evoloop::engine::acquisition::AcquisitionPolicy;
use evoloop::engine::config::{
    self as core_config, CacheConfig, CampaignConfig, ConvergenceConfig, EmbeddingConfig,
    TrainerConfig,
};
use evoloop::engine::embedding::RepresentationMode;
use evoloop::engine::embedding::backends::OneHotBackend;
use evoloop::engine::surrogate::{ForestParams, Hyperparameters, ModelFamily};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_BATCH_SIZE: usize = 8;
pub const DEFAULT_PATIENCE_ROUNDS: usize = 3;
/// Rounds' worth of selections the budget allows when `stopping.budget` is not set.
pub const DEFAULT_BUDGET_ROUNDS: usize = 10;
pub const DEFAULT_INITIAL_SAMPLES: usize = 10;
pub const DEFAULT_REPEATS: usize = 1;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialWildTypeConfig {
    sequence: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum PositionList {
    List(Vec<usize>),
    Ranges(String),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialSite {
    position: usize,
    residues: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", tag = "type")]
enum PartialMutationPolicy {
    SingleSite {
        positions: Option<PositionList>,
        alphabet: Option<String>,
    },
    Combinatorial {
        sites: Vec<PartialSite>,
        #[serde(rename = "max-order")]
        max_order: Option<usize>,
    },
    ExplicitList {
        candidates: Option<Vec<String>>,
        path: Option<PathBuf>,
    },
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialEmbeddingConfig {
    backend: Option<String>,
    #[serde(rename = "table-path")]
    table_path: Option<PathBuf>,
    #[serde(rename = "model-id")]
    model_id: Option<String>,
    mode: Option<String>,
    #[serde(rename = "batch-size")]
    batch_size: Option<usize>,
    #[serde(rename = "max-tokens-per-batch")]
    max_tokens_per_batch: Option<usize>,
    #[serde(rename = "truncate-to")]
    truncate_to: Option<usize>,
    #[serde(rename = "max-length")]
    max_length: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialCacheConfig {
    path: Option<PathBuf>,
    #[serde(rename = "tolerate-failure")]
    tolerate_failure: Option<bool>,
    #[serde(rename = "flush-threshold")]
    flush_threshold: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialModelConfig {
    family: Option<String>,
    alpha: Option<f64>,
    #[serde(rename = "n-trees")]
    n_trees: Option<usize>,
    #[serde(rename = "max-depth")]
    max_depth: Option<usize>,
    #[serde(rename = "min-samples-leaf")]
    min_samples_leaf: Option<usize>,
    #[serde(rename = "max-features")]
    max_features: Option<usize>,
    #[serde(rename = "min-labeled")]
    min_labeled: Option<usize>,
    #[serde(rename = "cv-folds")]
    cv_folds: Option<usize>,
    seed: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialAcquisitionConfig {
    policy: Option<String>,
    lambda: Option<f64>,
    #[serde(rename = "min-distance")]
    min_distance: Option<usize>,
    #[serde(rename = "batch-size")]
    batch_size: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialStoppingConfig {
    budget: Option<usize>,
    #[serde(rename = "improvement-tolerance")]
    improvement_tolerance: Option<f64>,
    #[serde(rename = "patience-rounds")]
    patience_rounds: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialBenchmarkConfig {
    #[serde(rename = "initial-samples")]
    initial_samples: Option<usize>,
    repeats: Option<usize>,
    seed: Option<u64>,
}

/// A campaign config file as written, every value optional.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct PartialCampaignConfig {
    #[serde(rename = "wild-type")]
    wild_type: Option<PartialWildTypeConfig>,
    mutations: Option<PartialMutationPolicy>,
    embedding: Option<PartialEmbeddingConfig>,
    cache: Option<PartialCacheConfig>,
    model: Option<PartialModelConfig>,
    acquisition: Option<PartialAcquisitionConfig>,
    stopping: Option<PartialStoppingConfig>,
    benchmark: Option<PartialBenchmarkConfig>,
    /// Directory that relative paths in the file are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Where the representation cache should live for this run.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CacheChoice {
    #[default]
    FromConfig,
    Path(PathBuf),
    InMemory,
}

/// Values given on the command line. They take precedence over the file; `-S` assignments
/// are applied to the file before anything else is resolved.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub set_values: Vec<String>,
    pub cache: CacheChoice,
    pub policy: Option<String>,
    pub acquisition_batch_size: Option<usize>,
    pub embedding_batch_size: Option<usize>,
    pub model: Option<String>,
    pub initial_samples: Option<usize>,
    pub repeats: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendSource {
    OneHot { max_length: usize },
    Table { path: PathBuf, model_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSettings {
    pub initial_samples: usize,
    pub repeats: usize,
    pub seed: u64,
}

/// Everything a command needs, with defaults filled in and validated.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub wild_type: Sequence,
    pub mutations: MutationPolicy,
    pub backend: BackendSource,
    pub cache: CacheConfig,
    pub campaign: CampaignConfig,
    pub benchmark: BenchmarkSettings,
}

fn config_error(key: &str, reason: impl std::fmt::Display) -> CliError {
    CliError::Config(format!("Invalid value for `{key}`: {reason}"))
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| config_error(key, format!("cannot parse '{value}'")))
}

impl PartialCampaignConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn merge_with_cli(mut self, overrides: &CliOverrides) -> Result<ResolvedConfig> {
        self.apply_set_values(&overrides.set_values)?;

        let wild_type = self.resolve_wild_type()?;
        let mutations = self.resolve_mutations()?;
        let backend = self.resolve_backend()?;
        let cache = self.resolve_cache(&overrides.cache)?;
        let campaign = self.build_campaign(overrides)?;
        let benchmark = self.resolve_benchmark(overrides);

        Ok(ResolvedConfig {
            wild_type,
            mutations,
            backend,
            cache,
            campaign,
            benchmark,
        })
    }

    /// Resolves only the model, acquisition and stopping sections, for configurations
    /// compared against a main config.
    pub fn resolve_campaign(mut self, overrides: &CliOverrides) -> Result<CampaignConfig> {
        self.apply_set_values(&overrides.set_values)?;
        self.build_campaign(overrides)
    }

    fn resolve_wild_type(&self) -> Result<Sequence> {
        let section = self.wild_type.clone().unwrap_or_default();
        let raw = match (section.sequence, section.path) {
            (Some(sequence), None) => sequence,
            (None, Some(path)) => {
                let path = self.resolve_path(&path);
                let content = std::fs::read_to_string(&path)?;
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.starts_with('>'))
                    .collect::<String>()
            }
            (Some(_), Some(_)) => {
                return Err(CliError::Config(
                    "`wild-type` takes either `sequence` or `path`, not both.".to_string(),
                ));
            }
            (None, None) => {
                return Err(CliError::Config(
                    "`wild-type.sequence` or `wild-type.path` is required.".to_string(),
                ));
            }
        };
        Sequence::parse(&raw).map_err(|e| config_error("wild-type", e))
    }

    fn resolve_mutations(&self) -> Result<MutationPolicy> {
        let Some(policy) = self.mutations.clone() else {
            return Ok(MutationPolicy::saturation());
        };
        let alphabet = |raw: &str| -> Result<Alphabet> {
            raw.parse().map_err(|e| config_error("mutations.alphabet", e))
        };
        match policy {
            PartialMutationPolicy::SingleSite {
                positions,
                alphabet: letters,
            } => {
                let positions = match positions {
                    None => None,
                    Some(PositionList::List(list)) => Some(list),
                    Some(PositionList::Ranges(ranges)) => Some(
                        parser::parse_positions(&ranges)
                            .map_err(|e| config_error("mutations.positions", e))?,
                    ),
                };
                Ok(MutationPolicy::SingleSite {
                    positions,
                    alphabet: match letters {
                        Some(letters) => alphabet(&letters)?,
                        None => Alphabet::standard(),
                    },
                })
            }
            PartialMutationPolicy::Combinatorial { sites, max_order } => {
                let sites = sites
                    .iter()
                    .map(|site| {
                        Ok(SiteSubstitutions {
                            position: site.position,
                            residues: alphabet(&site.residues)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(MutationPolicy::Combinatorial {
                    max_order: max_order.unwrap_or(sites.len()),
                    sites,
                })
            }
            PartialMutationPolicy::ExplicitList { candidates, path } => {
                let mut keys = candidates.unwrap_or_default();
                if let Some(path) = path {
                    let path = self.resolve_path(&path);
                    keys.extend(read_variant_keys(&path)?.into_iter().map(|(_, key)| key));
                }
                if keys.is_empty() {
                    return Err(CliError::Config(
                        "`explicit-list` mutations need `candidates` or `path`.".to_string(),
                    ));
                }
                Ok(MutationPolicy::ExplicitList {
                    candidates: keys.iter().map(|k| Candidate::infer(k)).collect(),
                })
            }
        }
    }

    fn embedding_section(&self) -> PartialEmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    fn resolve_backend(&self) -> Result<BackendSource> {
        let section = self.embedding_section();
        match section.backend.as_deref().unwrap_or("one-hot") {
            "one-hot" | "onehot" => Ok(BackendSource::OneHot {
                max_length: section
                    .max_length
                    .unwrap_or(OneHotBackend::DEFAULT_MAX_LENGTH),
            }),
            "table" => {
                let path = section.table_path.ok_or_else(|| {
                    CliError::Config("`embedding.table-path` is required for the table backend.".to_string())
                })?;
                let model_id = section.model_id.unwrap_or_else(|| {
                    path.file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| "table".to_string())
                });
                Ok(BackendSource::Table {
                    path: self.resolve_path(&path),
                    model_id,
                })
            }
            other => Err(config_error(
                "embedding.backend",
                format!("unknown backend '{other}' (expected one-hot or table)"),
            )),
        }
    }

    fn resolve_embedding(&self, overrides: &CliOverrides) -> Result<EmbeddingConfig> {
        let section = self.embedding_section();
        let defaults = EmbeddingConfig::default();
        Ok(EmbeddingConfig {
            mode: match section.mode {
                Some(mode) => RepresentationMode::from_str(&mode)
                    .map_err(|e| config_error("embedding.mode", e))?,
                None => defaults.mode,
            },
            batch_size: overrides
                .embedding_batch_size
                .or(section.batch_size)
                .unwrap_or(defaults.batch_size),
            max_tokens_per_batch: section.max_tokens_per_batch,
            truncate_to: section.truncate_to,
        })
    }

    fn resolve_cache(&self, choice: &CacheChoice) -> Result<CacheConfig> {
        let section = self.cache.clone().unwrap_or_default();
        let defaults = CacheConfig::default();
        let path = match choice {
            CacheChoice::InMemory => None,
            CacheChoice::Path(path) => Some(path.clone()),
            CacheChoice::FromConfig => match &section.path {
                Some(path) => Some(self.resolve_path(path)),
                None => Some(CacheLocation::resolve(None)?.path().to_path_buf()),
            },
        };
        Ok(CacheConfig {
            path,
            tolerate_store_failure: section
                .tolerate_failure
                .unwrap_or(defaults.tolerate_store_failure),
            flush_threshold: section.flush_threshold.unwrap_or(defaults.flush_threshold),
        })
    }

    fn resolve_trainer(&self, overrides: &CliOverrides) -> Result<TrainerConfig> {
        let section = self.model.clone().unwrap_or_default();
        let defaults = TrainerConfig::default();
        let family = match overrides.model.as_ref().or(section.family.as_ref()) {
            Some(name) => ModelFamily::from_str(name).map_err(|e| config_error("model.family", e))?,
            None => defaults.family,
        };
        let n_trees = section.n_trees.unwrap_or(defaults.n_trees);
        let hyperparameters = match family {
            ModelFamily::Ridge => {
                if section.max_depth.is_some() || section.min_samples_leaf.is_some() {
                    return Err(CliError::Config(
                        "`model.max-depth` and `model.min-samples-leaf` only apply to random-forest."
                            .to_string(),
                    ));
                }
                section.alpha.map(|alpha| Hyperparameters::Ridge { alpha })
            }
            ModelFamily::RandomForest => {
                if section.alpha.is_some() {
                    return Err(CliError::Config(
                        "`model.alpha` only applies to ridge.".to_string(),
                    ));
                }
                let pinned = section.max_depth.is_some()
                    || section.min_samples_leaf.is_some()
                    || section.max_features.is_some();
                pinned.then(|| {
                    Hyperparameters::RandomForest(ForestParams {
                        n_trees,
                        max_depth: section.max_depth,
                        min_samples_leaf: section.min_samples_leaf.unwrap_or(1),
                        max_features: section.max_features,
                    })
                })
            }
        };
        Ok(TrainerConfig {
            family,
            hyperparameters,
            n_trees,
            min_labeled: section.min_labeled.unwrap_or(defaults.min_labeled),
            cv_folds: section.cv_folds.unwrap_or(defaults.cv_folds),
            seed: section.seed.unwrap_or(defaults.seed),
        })
    }

    fn resolve_policy(&self, overrides: &CliOverrides) -> Result<AcquisitionPolicy> {
        let section = self.acquisition.clone().unwrap_or_default();
        let name = overrides
            .policy
            .as_deref()
            .or(section.policy.as_deref())
            .unwrap_or("exploit");
        let policy =
            parser::parse_policy(name).map_err(|e| config_error("acquisition.policy", e))?;
        // Explicit arguments in the policy string win over the separate keys.
        let has_argument = name.contains(':');
        Ok(match policy {
            AcquisitionPolicy::UpperConfidenceBound { lambda } if !has_argument => {
                AcquisitionPolicy::UpperConfidenceBound {
                    lambda: section.lambda.unwrap_or(lambda),
                }
            }
            AcquisitionPolicy::Diverse { min_distance } if !has_argument => {
                AcquisitionPolicy::Diverse {
                    min_distance: section.min_distance.unwrap_or(min_distance),
                }
            }
            other => other,
        })
    }

    fn build_campaign(&self, overrides: &CliOverrides) -> Result<CampaignConfig> {
        let acquisition = self.acquisition.clone().unwrap_or_default();
        let stopping = self.stopping.clone().unwrap_or_default();

        let batch_size = overrides
            .acquisition_batch_size
            .or(acquisition.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let mut builder = core_config::CampaignConfigBuilder::new()
            .embedding(self.resolve_embedding(overrides)?)
            .trainer(self.resolve_trainer(overrides)?)
            .policy(self.resolve_policy(overrides)?)
            .batch_size(batch_size)
            .budget(
                stopping
                    .budget
                    .unwrap_or(batch_size.saturating_mul(DEFAULT_BUDGET_ROUNDS)),
            );

        if stopping.patience_rounds.is_some() || stopping.improvement_tolerance.is_some() {
            builder = builder.convergence(ConvergenceConfig {
                improvement_tolerance: stopping.improvement_tolerance.unwrap_or(0.0),
                patience_rounds: stopping.patience_rounds.unwrap_or(DEFAULT_PATIENCE_ROUNDS),
            });
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn resolve_benchmark(&self, overrides: &CliOverrides) -> BenchmarkSettings {
        let section = self.benchmark.clone().unwrap_or_default();
        BenchmarkSettings {
            initial_samples: overrides
                .initial_samples
                .or(section.initial_samples)
                .unwrap_or(DEFAULT_INITIAL_SAMPLES),
            repeats: overrides
                .repeats
                .or(section.repeats)
                .unwrap_or(DEFAULT_REPEATS),
            seed: overrides.seed.or(section.seed).unwrap_or(0),
        }
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for assignment in set_values {
            let (key, value) = parser::parse_assignment(assignment)
                .map_err(|e| CliError::Config(e.to_string()))?;

            macro_rules! section {
                ($field:expr) => {
                    $field.get_or_insert_with(Default::default)
                };
            }

            match key {
                "wild-type.sequence" => {
                    let section = section!(self.wild_type);
                    section.sequence = Some(value.to_string());
                    section.path = None;
                }
                "embedding.mode" => section!(self.embedding).mode = Some(value.to_string()),
                "embedding.batch-size" => {
                    section!(self.embedding).batch_size = Some(parse_value(key, value)?)
                }
                "embedding.max-tokens-per-batch" => {
                    section!(self.embedding).max_tokens_per_batch = Some(parse_value(key, value)?)
                }
                "embedding.truncate-to" => {
                    section!(self.embedding).truncate_to = Some(parse_value(key, value)?)
                }
                "cache.tolerate-failure" => {
                    section!(self.cache).tolerate_failure = Some(parse_value(key, value)?)
                }
                "cache.flush-threshold" => {
                    section!(self.cache).flush_threshold = Some(parse_value(key, value)?)
                }
                "model.family" => section!(self.model).family = Some(value.to_string()),
                "model.alpha" => section!(self.model).alpha = Some(parse_value(key, value)?),
                "model.n-trees" => section!(self.model).n_trees = Some(parse_value(key, value)?),
                "model.max-depth" => section!(self.model).max_depth = Some(parse_value(key, value)?),
                "model.min-samples-leaf" => {
                    section!(self.model).min_samples_leaf = Some(parse_value(key, value)?)
                }
                "model.min-labeled" => {
                    section!(self.model).min_labeled = Some(parse_value(key, value)?)
                }
                "model.cv-folds" => section!(self.model).cv_folds = Some(parse_value(key, value)?),
                "model.seed" => section!(self.model).seed = Some(parse_value(key, value)?),
                "acquisition.policy" => section!(self.acquisition).policy = Some(value.to_string()),
                "acquisition.lambda" => {
                    section!(self.acquisition).lambda = Some(parse_value(key, value)?)
                }
                "acquisition.min-distance" => {
                    section!(self.acquisition).min_distance = Some(parse_value(key, value)?)
                }
                "acquisition.batch-size" => {
                    section!(self.acquisition).batch_size = Some(parse_value(key, value)?)
                }
                "stopping.budget" => section!(self.stopping).budget = Some(parse_value(key, value)?),
                "stopping.improvement-tolerance" => {
                    section!(self.stopping).improvement_tolerance = Some(parse_value(key, value)?)
                }
                "stopping.patience-rounds" => {
                    section!(self.stopping).patience_rounds = Some(parse_value(key, value)?)
                }
                "benchmark.initial-samples" => {
                    section!(self.benchmark).initial_samples = Some(parse_value(key, value)?)
                }
                "benchmark.repeats" => {
                    section!(self.benchmark).repeats = Some(parse_value(key, value)?)
                }
                "benchmark.seed" => section!(self.benchmark).seed = Some(parse_value(key, value)?),
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{key}'"
                    )));
                }
            }
        }
        Ok(())
    }
}
