//! `shopmind` command line: training, generation, suggestions and search.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;

use shopmind::constants::{DEFAULT_ENCODE_BATCH_SIZE, DEFAULT_SEARCH_K, DEFAULT_SEARCH_THRESHOLD};
use shopmind::index::{DEFAULT_NLIST, DEFAULT_NPROBE};
use shopmind::search::EncoderEmbedder;
use shopmind::training::dataset::read_texts;
use shopmind::{
    ContrastiveObjective, GenerationConfig, IndexKind, SemanticSearchEngine, StubEmbedder,
    SuggestParams, SuggestionEngine, TextEmbedder, TrainEncoderConfig, TrainLmConfig,
    WordAssociation, device_label, select_device, train_encoder, train_lm,
};

#[derive(Parser, Debug)]
#[command(name = "shopmind")]
#[command(about = "Train and query small e-commerce transformer models", long_about = None)]
struct Cli {
    /// Fixed RNG seed for sampling.
    #[arg(long, global = true, env = "SHOPMIND_SEED")]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the item-description language model on a `title<TAB>description` file.
    TrainLm {
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long, default_value_t = 5)]
        epochs: usize,
        #[arg(long, default_value_t = 16)]
        batch_size: usize,
        #[arg(long, default_value_t = 64)]
        max_seq_length: usize,
        #[arg(long, default_value_t = 20_000)]
        vocab_size: usize,
        /// Cap on loaded samples; `0` loads everything.
        #[arg(long, default_value_t = 50_000)]
        max_samples: usize,
    },
    /// Train the sentence encoder contrastively.
    TrainEncoder {
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// One text per line. A synthetic corpus is used when omitted.
        #[arg(long)]
        texts: Option<PathBuf>,
        #[arg(long, default_value_t = 2_000)]
        synthetic_size: usize,
        #[arg(long, default_value_t = 10)]
        epochs: usize,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
        /// `cosine` or `info_nce`.
        #[arg(long, default_value = "cosine")]
        objective: String,
    },
    /// Continue a prompt with the language model.
    Generate {
        prompt: String,
        #[arg(long, env = "SHOPMIND_MODEL_PATH", default_value = "item_desc_model_final")]
        model: PathBuf,
        #[arg(long, default_value_t = 50)]
        max_new_tokens: usize,
        #[arg(long, default_value_t = 0.8)]
        temperature: f32,
        #[arg(long, default_value_t = 20)]
        top_k: usize,
    },
    /// Search-box suggestions for a query prefix.
    Suggest {
        query: String,
        #[arg(long, env = "SHOPMIND_MODEL_PATH", default_value = "item_desc_model_final")]
        model: PathBuf,
        #[arg(short, default_value_t = 8)]
        n: usize,
        #[arg(long, default_value_t = 12)]
        max_new_tokens: usize,
        #[arg(long, default_value_t = 0.9)]
        temperature: f32,
        #[arg(long, default_value_t = 30)]
        top_k: usize,
    },
    /// Embed a texts file (one per line) and write an index snapshot.
    BuildIndex {
        #[arg(long)]
        texts: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, env = "SHOPMIND_ENCODER_PATH")]
        encoder: Option<PathBuf>,
        /// Use deterministic hash embeddings of this dimension instead of an encoder.
        #[arg(long, conflicts_with = "encoder")]
        stub_dim: Option<usize>,
        /// Build an IVF index instead of a flat one.
        #[arg(long)]
        ivf: bool,
        #[arg(long, default_value_t = DEFAULT_NLIST)]
        nlist: usize,
        #[arg(long, default_value_t = DEFAULT_NPROBE)]
        nprobe: usize,
    },
    /// Query an index snapshot.
    Search {
        query: String,
        #[arg(long, env = "SHOPMIND_INDEX_PATH")]
        index: PathBuf,
        #[arg(long, env = "SHOPMIND_ENCODER_PATH")]
        encoder: Option<PathBuf>,
        #[arg(long, conflicts_with = "encoder")]
        stub_dim: Option<usize>,
        #[arg(short, default_value_t = DEFAULT_SEARCH_K)]
        k: usize,
        #[arg(long, default_value_t = DEFAULT_SEARCH_THRESHOLD)]
        threshold: f32,
    },
    /// Nearest vocabulary words by embedding cosine.
    SimilarWords {
        word: String,
        #[arg(long, env = "SHOPMIND_MODEL_PATH", default_value = "item_desc_model_final")]
        model: PathBuf,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Words the model associates with a text.
    Associate {
        text: String,
        #[arg(long, env = "SHOPMIND_MODEL_PATH", default_value = "item_desc_model_final")]
        model: PathBuf,
        #[arg(long, default_value_t = 10)]
        max: usize,
        #[arg(long, default_value_t = 0.8)]
        temperature: f32,
    },
    /// Distinct completions of a partial phrase.
    Complete {
        partial: String,
        #[arg(long, env = "SHOPMIND_MODEL_PATH", default_value = "item_desc_model_final")]
        model: PathBuf,
        #[arg(long, default_value_t = 5)]
        max: usize,
    },
    /// Layered neighbourhood of a word.
    WordCloud {
        center: String,
        #[arg(long, env = "SHOPMIND_MODEL_PATH", default_value = "item_desc_model_final")]
        model: PathBuf,
        #[arg(long, default_value_t = 2)]
        layers: usize,
        #[arg(long, default_value_t = 8)]
        per_layer: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let device = select_device()?;
    tracing::info!(device = device_label(&device), "Device selected");
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    match cli.command {
        Command::TrainLm {
            data,
            out,
            epochs,
            batch_size,
            max_seq_length,
            vocab_size,
            max_samples,
        } => {
            let mut config = TrainLmConfig::new(data, out)
                .with_epochs(epochs)
                .with_batch_size(batch_size)
                .with_max_seq_length(max_seq_length)
                .with_vocab_size(vocab_size);
            config.max_samples = (max_samples > 0).then_some(max_samples);
            if let Some(seed) = cli.seed {
                config = config.with_seed(seed);
            }
            let report = train_lm(&config, &device)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::TrainEncoder {
            out,
            texts,
            synthetic_size,
            epochs,
            batch_size,
            objective,
        } => {
            let objective: ContrastiveObjective = objective.parse()?;
            let mut config = TrainEncoderConfig::new(out)
                .with_synthetic_size(synthetic_size)
                .with_epochs(epochs)
                .with_batch_size(batch_size)
                .with_objective(objective);
            if let Some(path) = texts {
                config = config.with_texts_path(path);
            }
            if let Some(seed) = cli.seed {
                config = config.with_seed(seed);
            }
            let report = train_encoder(&config, &device)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Generate {
            prompt,
            model,
            max_new_tokens,
            temperature,
            top_k,
        } => {
            let engine = SuggestionEngine::load(&model, &device)
                .with_context(|| format!("loading language model from {}", model.display()))?;
            let config = GenerationConfig::new(max_new_tokens, temperature, top_k);
            let generation = engine.generate(&prompt, &config, &mut rng)?;
            tracing::debug!(
                new_tokens = generation.new_tokens,
                hit_eos = generation.hit_eos,
                "Generation finished"
            );
            println!("{}", generation.text);
        }
        Command::Suggest {
            query,
            model,
            n,
            max_new_tokens,
            temperature,
            top_k,
        } => {
            let engine = SuggestionEngine::load(&model, &device)
                .with_context(|| format!("loading language model from {}", model.display()))?;
            let params = SuggestParams {
                n,
                max_new_tokens,
                temperature,
                top_k,
            };
            let suggestions = engine.suggest(&query, &params, &mut rng)?;
            println!(
                "{}",
                serde_json::json!({ "query": query, "suggestions": suggestions })
            );
        }
        Command::BuildIndex {
            texts,
            out,
            encoder,
            stub_dim,
            ivf,
            nlist,
            nprobe,
        } => {
            let kind = if ivf {
                IndexKind::Ivf { nlist, nprobe }
            } else {
                IndexKind::Flat
            };
            let documents = read_texts(&texts)?;
            match (encoder, stub_dim) {
                (Some(dir), _) => {
                    let embedder = EncoderEmbedder::load(&dir, &device)?;
                    build_index(SemanticSearchEngine::new(embedder, kind), &documents, &out)?;
                }
                (None, Some(dim)) => {
                    tracing::warn!(dim, "No encoder configured, indexing with stub embeddings");
                    let engine = SemanticSearchEngine::new(StubEmbedder::new(dim), kind);
                    build_index(engine, &documents, &out)?;
                }
                (None, None) => bail!("either --encoder or --stub-dim is required"),
            }
        }
        Command::Search {
            query,
            index,
            encoder,
            stub_dim,
            k,
            threshold,
        } => {
            let hits = match (encoder, stub_dim) {
                (Some(dir), _) => {
                    let engine = SemanticSearchEngine::from_checkpoint(
                        &dir,
                        Some(&index),
                        IndexKind::Flat,
                        &device,
                    )?;
                    engine.search(&query, k, threshold)?
                }
                (None, Some(dim)) => {
                    let mut engine =
                        SemanticSearchEngine::new(StubEmbedder::new(dim), IndexKind::Flat);
                    engine.load_index(&index)?;
                    engine.search(&query, k, threshold)?
                }
                (None, None) => bail!("either --encoder or --stub-dim is required"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "query": query, "results": hits }))?
            );
        }
        Command::SimilarWords { word, model, top_k } => {
            let association = WordAssociation::load(&model, &device)?;
            for similar in association.similar_words(&word, top_k)? {
                println!("{}\t{:.4}", similar.word, similar.similarity);
            }
        }
        Command::Associate {
            text,
            model,
            max,
            temperature,
        } => {
            let association = WordAssociation::load(&model, &device)?;
            let words = association.associations(&text, max, temperature, &mut rng)?;
            println!("{}", words.join(" "));
        }
        Command::Complete {
            partial,
            model,
            max,
        } => {
            let association = WordAssociation::load(&model, &device)?;
            for completion in association.complete_phrase(&partial, max, &mut rng)? {
                println!("{partial}{completion}");
            }
        }
        Command::WordCloud {
            center,
            model,
            layers,
            per_layer,
        } => {
            let association = WordAssociation::load(&model, &device)?;
            let cloud = association.word_cloud(&center, layers, per_layer)?;
            for (depth, words) in cloud.iter().enumerate() {
                println!("{depth}: {}", words.join(" "));
            }
        }
    }

    Ok(())
}

fn build_index<E: TextEmbedder>(
    mut engine: SemanticSearchEngine<E>,
    documents: &[String],
    out: &Path,
) -> anyhow::Result<()> {
    let index = engine.build_index_from_texts(documents, None, DEFAULT_ENCODE_BATCH_SIZE)?;
    let stats = index.stats();
    engine.save_index(out)?;
    tracing::info!(path = %out.display(), "Index snapshot written");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
