//! Word frequency example.
//!
//! Reads text lines, normalizes words on a worker pool, and counts them with
//! both a sequential fold and a chunked parallel fold.
//!
//! Run with: RUST_LOG=pipefold=debug cargo run --example word_count

use pipefold::prelude::*;
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;

const TEXT: &str = "\
The quick brown fox jumps over the lazy dog
The dog sleeps; the fox runs.
A quick fox, a lazy dog, and the end.";

fn words() -> impl Source<Output = String> {
    let words: Vec<String> = TEXT
        .lines()
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect();
    from_iter(words)
}

fn normalize(word: String) -> Option<String> {
    let cleaned: String = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn count(mut acc: HashMap<String, usize>, word: String) -> StageResult<HashMap<String, usize>> {
    *acc.entry(word).or_default() += 1;
    Ok(acc)
}

fn merge(
    mut left: HashMap<String, usize>,
    right: HashMap<String, usize>,
) -> StageResult<HashMap<String, usize>> {
    for (word, n) in right {
        *left.entry(word).or_default() += n;
    }
    Ok(left)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Word Count Example ===\n");

    // 1. Parallel map into a sink, in source order
    println!("1. Normalized words (parallel, ordered)");
    let sink = pipeline(words())
        .then(filter_map(normalize))
        .sink(collect())
        .run_parallel(&ParallelConfig::new(4).with_name("normalize"))?;
    println!("   {}", sink.into_inner().join(" "));

    // 2. Sequential fold
    println!("\n2. Sequential fold");
    let counts = pipeline(words())
        .then(filter_map(normalize))
        .fold(HashMap::new(), count)?;
    print_top(&counts);

    // 3. Parallel fold with a merge step
    println!("\n3. Parallel fold");
    let config = FoldConfig::new(3).with_chunk_size(4).with_name("word_count");
    let parallel = pipeline(words())
        .then(filter_map(normalize))
        .fold_parallel(HashMap::new(), count, merge, &config)?;
    print_top(&parallel);

    assert_eq!(counts, parallel);
    println!("\n=== Done ===");
    Ok(())
}

fn print_top(counts: &HashMap<String, usize>) {
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (word, n) in entries.into_iter().take(5) {
        println!("   {word:>6}: {n}");
    }
}
