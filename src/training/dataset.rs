//! Training corpora: title/description pairs for the LM and augmented texts for the
//! contrastive encoder.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::{Device, Tensor};
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use tracing::info;

use super::error::{TrainingError, TrainingResult};
use crate::constants::{EOS_ID, IGNORE_INDEX, PAD_ID, SEP_ID, SOS_ID, UNK_ID};
use crate::model::layers::pad_batch;
use crate::text::{EncodeOptions, TextTokenizer};

/// Lines read when building the LM vocabulary.
pub const DEFAULT_VOCAB_LINES: usize = 10_001;

fn open_lines(path: &Path) -> TrainingResult<impl Iterator<Item = std::io::Result<String>>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TrainingError::DatasetNotFound {
            path: path.to_path_buf(),
        },
        _ => TrainingError::Io(e),
    })?;
    Ok(BufReader::new(file).lines())
}

/// Splits a trimmed TSV line on its first tab.
fn split_pair(line: &str) -> Option<(&str, &str)> {
    if !line.contains('\t') {
        return None;
    }
    line.trim().split_once('\t')
}

/// Titles and descriptions of the first `max_lines` lines, for vocabulary building.
pub fn vocab_texts(path: &Path, max_lines: usize) -> TrainingResult<Vec<String>> {
    let mut texts = Vec::new();
    for line in open_lines(path)?.take(max_lines) {
        let line = line?;
        if let Some((title, desc)) = split_pair(&line) {
            texts.push(title.to_string());
            texts.push(desc.to_string());
        }
    }
    Ok(texts)
}

/// One LM training row.
#[derive(Debug, Clone, PartialEq)]
pub struct LmExample {
    /// `<SOS> title <SEP> desc <EOS>`, truncated and right-padded.
    pub ids: Vec<u32>,
    /// Next-token targets; padding positions hold [`IGNORE_INDEX`].
    pub labels: Vec<i64>,
    /// `true` on padding positions.
    pub padding: Vec<bool>,
}

/// A collated batch ready for the LM.
#[derive(Debug)]
pub struct LmBatch {
    pub ids: Tensor,
    pub labels: Vec<i64>,
    pub padding: Vec<Vec<bool>>,
}

/// Title/description pairs read from a TSV file.
#[derive(Debug, Clone)]
pub struct ItemDescDataset {
    samples: Vec<(String, String)>,
    max_seq_length: usize,
}

impl ItemDescDataset {
    /// Reads `title<TAB>description` lines, skipping malformed ones.
    pub fn load(
        path: &Path,
        max_seq_length: usize,
        max_samples: Option<usize>,
    ) -> TrainingResult<Self> {
        let mut samples = Vec::new();
        for line in open_lines(path)? {
            let line = line?;
            let Some((title, desc)) = split_pair(&line) else {
                continue;
            };
            if title.is_empty() || desc.is_empty() {
                continue;
            }
            samples.push((title.to_string(), desc.to_string()));
            if max_samples.is_some_and(|max| samples.len() >= max) {
                break;
            }
        }
        info!(path = %path.display(), samples = samples.len(), "Item description dataset loaded");
        Ok(Self::from_pairs(samples, max_seq_length))
    }

    pub fn from_pairs(samples: Vec<(String, String)>, max_seq_length: usize) -> Self {
        Self {
            samples,
            max_seq_length,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    pub fn pair(&self, idx: usize) -> Option<(&str, &str)> {
        self.samples
            .get(idx)
            .map(|(t, d)| (t.as_str(), d.as_str()))
    }

    pub fn example(&self, idx: usize, tokenizer: &TextTokenizer) -> Option<LmExample> {
        let (title, desc) = self.pair(idx)?;
        let max = self.max_seq_length;

        let mut ids = Vec::with_capacity(max);
        ids.push(SOS_ID);
        ids.extend(tokenizer.encode(title, EncodeOptions::plain()));
        ids.push(SEP_ID);
        ids.extend(tokenizer.encode(desc, EncodeOptions::plain()));
        ids.push(EOS_ID);
        ids.truncate(max);

        let real = ids.len();
        ids.resize(max, PAD_ID);
        let padding = (0..max).map(|i| i >= real).collect();
        let labels = ids[1..]
            .iter()
            .chain(std::iter::once(&PAD_ID))
            .map(|&t| if t == PAD_ID { IGNORE_INDEX } else { i64::from(t) })
            .collect();

        Some(LmExample {
            ids,
            labels,
            padding,
        })
    }

    /// Stacks the examples at `indices` into one batch.
    pub fn batch(
        &self,
        indices: &[usize],
        tokenizer: &TextTokenizer,
        device: &Device,
    ) -> TrainingResult<LmBatch> {
        let len = self.max_seq_length;
        let mut ids = Vec::with_capacity(indices.len() * len);
        let mut labels = Vec::with_capacity(indices.len() * len);
        let mut padding = Vec::with_capacity(indices.len());
        for &idx in indices {
            let example = self
                .example(idx, tokenizer)
                .ok_or(TrainingError::EmptyDataset { what: "batch" })?;
            ids.extend(example.ids);
            labels.extend(example.labels);
            padding.push(example.padding);
        }
        let ids = Tensor::from_vec(ids, (indices.len(), len), device)?;
        Ok(LmBatch {
            ids,
            labels,
            padding,
        })
    }
}

/// Shuffled index batches for one epoch. The last batch may be short.
pub fn shuffled_batches<R: Rng + ?Sized>(len: usize, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

const AUGMENT_PROBABILITY: f32 = 0.5;
const DELETE_PROBABILITY: f32 = 0.3;
const SYNONYM_PROBABILITY: f32 = 0.2;

const SYNONYMS: [(&str, [&str; 2]); 5] = [
    ("机器学习", ["ML", "machine learning"]),
    ("深度学习", ["DL", "deep learning"]),
    ("自然语言处理", ["NLP", "自然语言理解"]),
    ("计算机视觉", ["CV", "图像识别"]),
    ("人工智能", ["AI", "智能系统"]),
];

const BASE_PHRASES: [&str; 12] = [
    "机器学习", "深度学习", "自然语言处理", "计算机视觉", "人工智能", "神经网络",
    "数据分析", "模型训练", "算法优化", "特征工程", "数据预处理", "模型评估",
];

const TEMPLATES: [&str; 8] = [
    "{}是人工智能的重要领域",
    "{}需要大量的数据支持",
    "{}技术正在快速发展",
    "{}在工业界有广泛应用",
    "{}的研究取得了重大突破",
    "{}算法非常有效",
    "{}模型性能优秀",
    "{}方法简单易用",
];

/// Random word deletion (only for more than three whitespace words) and synonym swaps.
pub fn augment_text<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let mut words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 3 && rng.random::<f32>() < DELETE_PROBABILITY {
        let idx = rng.random_range(0..words.len());
        words.remove(idx);
    }
    for word in words.iter_mut() {
        if let Some((_, options)) = SYNONYMS.iter().find(|(w, _)| *w == *word)
            && rng.random::<f32>() < SYNONYM_PROBABILITY
            && let Some(choice) = options.choose(rng)
        {
            *word = *choice;
        }
    }
    words.join(" ")
}

/// `size` sentences, each a random base phrase placed in a random template.
pub fn synthetic_corpus<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Vec<String> {
    (0..size)
        .filter_map(|_| {
            let phrase = BASE_PHRASES.choose(rng)?;
            let template = TEMPLATES.choose(rng)?;
            Some(template.replacen("{}", phrase, 1))
        })
        .collect()
}

/// Reads one text per non-blank line.
pub fn read_texts(path: &Path) -> TrainingResult<Vec<String>> {
    let mut texts = Vec::new();
    for line in open_lines(path)? {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            texts.push(line.to_string());
        }
    }
    Ok(texts)
}

/// Two views of a batch of texts plus the label of each row.
#[derive(Debug)]
pub struct ContrastiveBatch {
    pub anchors: (Tensor, Vec<Vec<bool>>),
    pub positives: (Tensor, Vec<Vec<bool>>),
    pub labels: Vec<usize>,
}

/// Texts paired with optionally augmented copies of themselves.
#[derive(Debug, Clone)]
pub struct ContrastiveDataset {
    texts: Vec<String>,
    labels: Vec<usize>,
    max_length: usize,
    augment: bool,
}

impl ContrastiveDataset {
    /// Identical texts share a label, the index of their last occurrence.
    pub fn new(texts: Vec<String>, max_length: usize, augment: bool) -> Self {
        let last: HashMap<&str, usize> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();
        let labels = texts.iter().map(|t| last[t.as_str()]).collect();
        Self {
            texts,
            labels,
            max_length,
            augment,
        }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    /// Plain ids truncated to `max_length`; empty text becomes a single `<UNK>`.
    pub fn encode(&self, text: &str, tokenizer: &TextTokenizer) -> Vec<u32> {
        let mut ids = tokenizer.encode(text, EncodeOptions::plain());
        if ids.is_empty() {
            ids.push(UNK_ID);
        }
        ids.truncate(self.max_length);
        ids
    }

    /// Anchor ids, positive ids (augmented with probability one half) and the label.
    pub fn pair<R: Rng + ?Sized>(
        &self,
        idx: usize,
        tokenizer: &TextTokenizer,
        rng: &mut R,
    ) -> Option<(Vec<u32>, Vec<u32>, usize)> {
        let text = self.texts.get(idx)?;
        let positive = if self.augment && rng.random::<f32>() < AUGMENT_PROBABILITY {
            augment_text(text, rng)
        } else {
            text.clone()
        };
        Some((
            self.encode(text, tokenizer),
            self.encode(&positive, tokenizer),
            self.labels[idx],
        ))
    }

    pub fn batch<R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        tokenizer: &TextTokenizer,
        device: &Device,
        rng: &mut R,
    ) -> TrainingResult<ContrastiveBatch> {
        let mut anchors = Vec::with_capacity(indices.len());
        let mut positives = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            let (a, p, label) = self
                .pair(idx, tokenizer, rng)
                .ok_or(TrainingError::EmptyDataset { what: "batch" })?;
            anchors.push(a);
            positives.push(p);
            labels.push(label);
        }
        Ok(ContrastiveBatch {
            anchors: pad_batch(&anchors, device)?,
            positives: pad_batch(&positives, device)?,
            labels,
        })
    }
}
