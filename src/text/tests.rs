use super::*;
use crate::constants::SEP_ID;
use tempfile::TempDir;

fn built(texts: &[&str], vocab_size: usize) -> TextTokenizer {
    let mut tokenizer = TextTokenizer::new(vocab_size);
    tokenizer.build_vocab(texts.iter().copied());
    tokenizer
}

#[test]
fn test_tokenize_mixed_text() {
    let tokens = TextTokenizer::tokenize("iPhone15 智能手机, 5G!");
    assert_eq!(
        tokens,
        vec!["iphone15", "智", "能", "手", "机", ",", "5g", "!"]
    );
}

#[test]
fn test_tokenize_drops_other_word_chars() {
    let tokens = TextTokenizer::tokenize("a_b café");
    assert_eq!(tokens, vec!["a", "b", "caf"]);
}

#[test]
fn test_tokenize_keeps_fullwidth_punctuation() {
    let tokens = TextTokenizer::tokenize("好，的。");
    assert_eq!(tokens, vec!["好", "，", "的", "。"]);
}

#[test]
fn test_tokenize_empty() {
    assert!(TextTokenizer::tokenize("   ").is_empty());
}

#[test]
fn test_build_vocab_frequency_order() {
    let tokenizer = built(&["b a a", "c b a"], 100);
    assert_eq!(tokenizer.token_id("a"), Some(5));
    assert_eq!(tokenizer.token_id("b"), Some(6));
    assert_eq!(tokenizer.token_id("c"), Some(7));
    assert_eq!(tokenizer.len(), 8);
}

#[test]
fn test_build_vocab_respects_size_limit() {
    let tokenizer = built(&["x x x y y z"], 7);
    assert_eq!(tokenizer.len(), 7);
    assert!(tokenizer.token_id("x").is_some());
    assert!(tokenizer.token_id("y").is_some());
    assert!(tokenizer.token_id("z").is_none());
}

#[test]
fn test_build_vocab_replaces_previous() {
    let mut tokenizer = built(&["old"], 100);
    tokenizer.build_vocab(["new"]);
    assert!(tokenizer.token_id("old").is_none());
    assert_eq!(tokenizer.token_id("new"), Some(5));
}

#[test]
fn test_encode_with_specials_and_unknown() {
    let tokenizer = built(&["手机"], 100);
    let ids = tokenizer.encode("手表", EncodeOptions::default());
    let shou = tokenizer.token_id("手").unwrap();
    assert_eq!(ids, vec![SOS_ID, shou, UNK_ID, EOS_ID]);
}

#[test]
fn test_encode_plain() {
    let tokenizer = built(&["手机"], 100);
    let ids = tokenizer.encode("手机", EncodeOptions::plain());
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&SOS_ID));
}

#[test]
fn test_encode_pad_to_max() {
    let tokenizer = built(&["ab"], 100);
    let ids = tokenizer.encode("ab", EncodeOptions::padded(5));
    assert_eq!(ids, vec![SOS_ID, 5, EOS_ID, PAD_ID, PAD_ID]);
}

#[test]
fn test_encode_truncate_keeps_eos() {
    let tokenizer = built(&["a b c d e"], 100);
    let ids = tokenizer.encode("a b c d e", EncodeOptions::padded(4));
    assert_eq!(ids.len(), 4);
    assert_eq!(ids[0], SOS_ID);
    assert_eq!(ids[3], EOS_ID);
}

#[test]
fn test_encode_max_length_without_padding_is_ignored() {
    let tokenizer = built(&["a b c d e"], 100);
    let opts = EncodeOptions {
        max_length: Some(2),
        add_special_tokens: false,
        pad_to_max: false,
    };
    assert_eq!(tokenizer.encode("a b c d e", opts).len(), 5);
}

#[test]
fn test_decode_concat_and_stop_at_eos() {
    let tokenizer = built(&["运动鞋"], 100);
    let mut ids = tokenizer.encode("运动鞋", EncodeOptions::default());
    ids.push(tokenizer.token_id("运").unwrap());
    assert_eq!(tokenizer.decode(&ids, DecodeOptions::default()), "运动鞋");
}

#[test]
fn test_decode_with_spaces_and_specials() {
    let tokenizer = built(&["red shoes"], 100);
    let ids = vec![SOS_ID, 5, SEP_ID, 6];
    let opts = DecodeOptions {
        skip_special_tokens: false,
        stop_at_eos: true,
        concat: false,
    };
    let text = tokenizer.decode(&ids, opts);
    assert!(text.starts_with("<SOS> "));
    assert!(text.contains("<SEP>"));
}

#[test]
fn test_decode_unknown_id_is_empty() {
    let tokenizer = built(&["a"], 100);
    assert_eq!(tokenizer.decode(&[5, 9999, 5], DecodeOptions::default()), "aa");
}

#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tokenizer.json");
    let tokenizer = built(&["连衣裙 dress", "连衣裙"], 50);
    tokenizer.save(&path).unwrap();

    let loaded = TextTokenizer::load(&path).unwrap();
    assert_eq!(loaded.len(), tokenizer.len());
    assert_eq!(loaded.vocab_size(), 50);
    assert_eq!(loaded.token_id("dress"), tokenizer.token_id("dress"));
    assert_eq!(
        loaded.encode("连衣裙", EncodeOptions::default()),
        tokenizer.encode("连衣裙", EncodeOptions::default())
    );
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = TextTokenizer::load(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, TokenizerError::NotFound { .. }));
}

#[test]
fn test_load_rejects_reordered_specials() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tokenizer.json");
    std::fs::write(
        &path,
        r#"{"vocab_size": 10, "tokens": ["<SOS>", "<PAD>", "<EOS>", "<UNK>", "<SEP>"]}"#,
    )
    .unwrap();
    let err = TextTokenizer::load(&path).unwrap_err();
    assert!(matches!(err, TokenizerError::Corrupt { .. }));
}
