use super::dataset::{read_texts, shuffled_batches, vocab_texts};
use super::*;
use crate::constants::{EOS_ID, IGNORE_INDEX, PAD_ID, SEP_ID, SOS_ID, UNK_ID};
use crate::model::{ItemDescLm, SentenceEncoder, StackConfig, checkpoint};
use crate::text::TextTokenizer;
use candle_core::{Device, Tensor, Var};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use tempfile::TempDir;

fn tiny_stack() -> StackConfig {
    StackConfig {
        d_model: 16,
        nhead: 2,
        num_layers: 1,
        dim_feedforward: 32,
        dropout: 0.0,
    }
}

fn write_tsv(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("items.tsv");
    fs::write(
        &path,
        "智能手机\t高清拍照 超长续航\n\
         no tab line\n\
         连衣裙\t夏季新款 碎花\n\
         \t缺少标题\n\
         运动鞋\t透气 轻便 跑步\n\
         笔记本电脑\t轻薄 高性能\n",
    )
    .unwrap();
    path
}

#[test]
fn test_dataset_skips_malformed_lines() {
    let dir = TempDir::new().unwrap();
    let path = write_tsv(&dir);
    let dataset = ItemDescDataset::load(&path, 16, None).unwrap();
    assert_eq!(dataset.len(), 4);
    assert_eq!(dataset.pair(1), Some(("连衣裙", "夏季新款 碎花")));

    let limited = ItemDescDataset::load(&path, 16, Some(2)).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn test_dataset_missing_file() {
    let err = ItemDescDataset::load(std::path::Path::new("/nonexistent/items.tsv"), 16, None)
        .unwrap_err();
    assert!(matches!(err, TrainingError::DatasetNotFound { .. }));
}

#[test]
fn test_vocab_texts_reads_both_fields() {
    let dir = TempDir::new().unwrap();
    let path = write_tsv(&dir);
    let texts = vocab_texts(&path, 1).unwrap();
    assert_eq!(texts, vec!["智能手机", "高清拍照 超长续航"]);
}

#[test]
fn test_example_layout_and_labels() {
    let mut tokenizer = TextTokenizer::new(100);
    tokenizer.build_vocab(["手机 拍照"]);
    let dataset = ItemDescDataset::from_pairs(vec![("手机".into(), "拍照".into())], 10);
    let example = dataset.example(0, &tokenizer).unwrap();

    let shou = tokenizer.token_id("手").unwrap();
    let ji = tokenizer.token_id("机").unwrap();
    let pai = tokenizer.token_id("拍").unwrap();
    let zhao = tokenizer.token_id("照").unwrap();
    assert_eq!(
        example.ids,
        vec![SOS_ID, shou, ji, SEP_ID, pai, zhao, EOS_ID, PAD_ID, PAD_ID, PAD_ID]
    );
    assert_eq!(
        example.labels,
        vec![
            i64::from(shou),
            i64::from(ji),
            i64::from(SEP_ID),
            i64::from(pai),
            i64::from(zhao),
            i64::from(EOS_ID),
            IGNORE_INDEX,
            IGNORE_INDEX,
            IGNORE_INDEX,
            IGNORE_INDEX
        ]
    );
    assert_eq!(
        example.padding,
        vec![false, false, false, false, false, false, false, true, true, true]
    );
}

#[test]
fn test_example_truncates_without_forcing_eos() {
    let mut tokenizer = TextTokenizer::new(100);
    tokenizer.build_vocab(["手机 拍照"]);
    let dataset = ItemDescDataset::from_pairs(vec![("手机".into(), "拍照".into())], 4);
    let example = dataset.example(0, &tokenizer).unwrap();
    assert_eq!(example.ids.len(), 4);
    assert_eq!(example.ids[3], SEP_ID);
    assert_eq!(*example.labels.last().unwrap(), IGNORE_INDEX);
    assert!(example.padding.iter().all(|p| !p));
}

#[test]
fn test_shuffled_batches_cover_all_indices() {
    let mut rng = StdRng::seed_from_u64(7);
    let batches = shuffled_batches(10, 4, &mut rng);
    assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);
    let mut all: Vec<usize> = batches.into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_augment_text_keeps_short_texts() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..20 {
        assert_eq!(augment_text("模型训练很快", &mut rng), "模型训练很快");
    }
}

#[test]
fn test_augment_text_deletes_or_swaps() {
    let mut rng = StdRng::seed_from_u64(9);
    let original = "机器学习 深度学习 人工智能 计算机视觉 自然语言处理";
    let changed = (0..50).any(|_| augment_text(original, &mut rng) != original);
    assert!(changed);
    for _ in 0..20 {
        let out = augment_text(original, &mut rng);
        let words = out.split_whitespace().count();
        assert!((4..=8).contains(&words));
    }
}

#[test]
fn test_synthetic_corpus() {
    let mut rng = StdRng::seed_from_u64(3);
    let corpus = synthetic_corpus(50, &mut rng);
    assert_eq!(corpus.len(), 50);
    assert!(corpus.iter().all(|t| !t.contains("{}")));
}

#[test]
fn test_contrastive_labels_share_duplicates() {
    let texts = vec!["a".to_string(), "b".to_string(), "a".to_string()];
    let dataset = ContrastiveDataset::new(texts, 8, false);
    let mut tokenizer = TextTokenizer::new(20);
    tokenizer.build_vocab(dataset.texts());
    let mut rng = StdRng::seed_from_u64(0);

    let (anchor, positive, label) = dataset.pair(0, &tokenizer, &mut rng).unwrap();
    assert_eq!(anchor, positive);
    assert_eq!(label, 2);
    assert_eq!(dataset.pair(1, &tokenizer, &mut rng).unwrap().2, 1);
    assert!(dataset.pair(3, &tokenizer, &mut rng).is_none());
}

#[test]
fn test_contrastive_encoding_matches_encoder_input() {
    let texts = vec!["手机".to_string(), String::new()];
    let dataset = ContrastiveDataset::new(texts, 8, false);
    let mut tokenizer = TextTokenizer::new(20);
    tokenizer.build_vocab(dataset.texts());

    let ids = dataset.encode("手机", &tokenizer);
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&SOS_ID) && !ids.contains(&EOS_ID));
    assert_eq!(dataset.encode("", &tokenizer), vec![UNK_ID]);
    assert_eq!(dataset.encode(&"手".repeat(20), &tokenizer).len(), 8);
}

#[test]
fn test_read_texts_skips_blank_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("texts.txt");
    fs::write(&path, "手机壳\n\n  \n连衣裙 \n").unwrap();
    assert_eq!(read_texts(&path).unwrap(), vec!["手机壳", "连衣裙"]);
}

#[test]
fn test_masked_cross_entropy_ignores_padding() {
    let logits = Tensor::new(
        &[[[2.0f32, 0.0, 0.0], [0.0, 0.0, 0.0]]],
        &Device::Cpu,
    )
    .unwrap();
    let loss = loss::masked_cross_entropy(&logits, &[0, IGNORE_INDEX])
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    let expected = -(2f32.exp() / (2f32.exp() + 2.0)).ln();
    assert!((loss - expected).abs() < 1e-5);

    let all_ignored = loss::masked_cross_entropy(&logits, &[IGNORE_INDEX, IGNORE_INDEX])
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert_eq!(all_ignored, 0.0);
    assert!(loss::masked_cross_entropy(&logits, &[0]).is_err());
}

#[test]
fn test_cosine_embedding_loss() {
    let a = Tensor::new(&[[1.0f32, 0.0], [0.0, 2.0]], &Device::Cpu).unwrap();
    let same = loss::cosine_embedding_loss(&a, &a).unwrap().to_scalar::<f32>().unwrap();
    assert!(same.abs() < 1e-6);

    let b = Tensor::new(&[[0.0f32, 1.0], [0.0, -1.0]], &Device::Cpu).unwrap();
    let diff = loss::cosine_embedding_loss(&a, &b).unwrap().to_scalar::<f32>().unwrap();
    assert!((diff - 1.5).abs() < 1e-6);
}

#[test]
fn test_info_nce_prefers_aligned_pairs() {
    let aligned = Tensor::new(
        &[[1.0f32, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]],
        &Device::Cpu,
    )
    .unwrap();
    let crossed = Tensor::new(
        &[[1.0f32, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]],
        &Device::Cpu,
    )
    .unwrap();
    let labels = [0, 1, 0, 1];
    let good = loss::info_nce_loss(&aligned, &labels, 0.05)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    let bad = loss::info_nce_loss(&crossed, &labels, 0.05)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert!(good.is_finite() && bad.is_finite());
    assert!(good < 1e-3);
    assert!(bad > good);
}

#[test]
fn test_cosine_schedule() {
    let schedule = CosineAnnealing::new(1e-4, 100);
    assert!((schedule.lr_at(0) - 1e-4).abs() < 1e-12);
    assert!((schedule.lr_at(50) - 5e-5).abs() < 1e-12);
    assert!(schedule.lr_at(100).abs() < 1e-12);
    assert!(schedule.lr_at(500).abs() < 1e-12);
    assert!(CosineAnnealing::new(1.0, 10).with_min_lr(0.5).lr_at(10) >= 0.5);
}

#[test]
fn test_clip_grad_norm_rescales() {
    let var = Var::new(&[3.0f32, 4.0], &Device::Cpu).unwrap();
    let loss = (var.as_tensor() * var.as_tensor()).unwrap().sum_all().unwrap();
    let mut grads = loss.backward().unwrap();
    let vars = vec![var.clone()];

    let norm = clip::clip_grad_norm(&mut grads, &vars, 1.0).unwrap();
    assert!((norm - 10.0).abs() < 1e-4);
    let clipped = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
    let clipped_norm = clipped.iter().map(|g| g * g).sum::<f32>().sqrt();
    assert!((clipped_norm - 1.0).abs() < 1e-4);

    let untouched = clip::clip_grad_norm(&mut grads, &vars, 5.0).unwrap();
    assert!((untouched - 1.0).abs() < 1e-4);
}

#[test]
fn test_config_validation() {
    let config = TrainLmConfig::new("a.tsv", "out").with_batch_size(0);
    assert!(matches!(
        config.validate(),
        Err(TrainingError::InvalidConfig { .. })
    ));
    let config = TrainEncoderConfig::new("out").with_objective(ContrastiveObjective::InfoNce {
        temperature: 0.0,
    });
    assert!(config.validate().is_err());
    assert_eq!(
        "info-nce".parse::<ContrastiveObjective>().unwrap(),
        ContrastiveObjective::info_nce()
    );
    assert!("triplet".parse::<ContrastiveObjective>().is_err());
}

#[test]
fn test_train_lm_writes_checkpoints() {
    let dir = TempDir::new().unwrap();
    let data = write_tsv(&dir);
    let out = dir.path().join("out");
    let mut config = TrainLmConfig::new(&data, &out)
        .with_vocab_size(200)
        .with_max_seq_length(16)
        .with_batch_size(2)
        .with_epochs(2)
        .with_stack(tiny_stack())
        .with_seed(1);
    config.sample_prompts = vec!["手机".to_string()];
    config.sample_generation = crate::generation::GenerationConfig::new(3, 0.8, 5);

    let report = train_lm(&config, &Device::Cpu).unwrap();
    assert_eq!(report.epoch_losses.len(), 2);
    assert_eq!(report.steps, 4);
    assert!(report.epoch_losses.iter().all(|l| l.is_finite() && *l > 0.0));
    assert!(out.join("item_desc_model_epoch_1").is_dir());
    assert!(out.join("item_desc_model_epoch_2").is_dir());

    let (model, tokenizer) = ItemDescLm::load(&report.final_checkpoint, &Device::Cpu).unwrap();
    assert_eq!(model.config().vocab_size, tokenizer.len());
    assert_eq!(model.config().max_seq_length, 16);
    let state = checkpoint::read_training_state(&report.final_checkpoint)
        .unwrap()
        .unwrap();
    assert_eq!(state.epoch, 2);
}

#[test]
fn test_train_encoder_writes_checkpoints() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("enc");
    let config = TrainEncoderConfig::new(&out)
        .with_synthetic_size(12)
        .with_max_length(24)
        .with_batch_size(4)
        .with_epochs(2)
        .with_stack(tiny_stack())
        .with_objective(ContrastiveObjective::info_nce())
        .with_seed(5);

    let report = train_encoder(&config, &Device::Cpu).unwrap();
    assert_eq!(report.epoch_losses.len(), 2);
    assert!(report.epoch_losses.iter().all(|l| l.is_finite()));
    assert!(out.join("sentence_encoder_epoch_2").is_dir());

    let (encoder, tokenizer) =
        SentenceEncoder::load(&report.final_checkpoint, &Device::Cpu).unwrap();
    let matrix = evaluate(&encoder, &tokenizer, &["机器学习", "深度学习"]).unwrap();
    assert_eq!(matrix.len(), 2);
    assert!((matrix[0][0] - 1.0).abs() < 1e-4 || matrix[0][0].abs() < 1e-4);
}
