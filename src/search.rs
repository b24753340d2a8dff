//! Semantic search over indexed units.
//!
//! Embeds the query with the configured provider and ranks stored units by
//! cosine similarity. Only vectors with the provider's dimensionality are
//! considered, so switching models never mixes incompatible spaces.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{create_provider, embed_query};
use crate::index::SqliteIndex;
use crate::models::SearchHit;
use crate::traits::VectorIndex;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: usize,
    threshold: Option<f32>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let provider = create_provider(&config.embedding)?;
    let vector = embed_query(provider.as_ref(), query).await?;

    let index = SqliteIndex::open(&config.index.path).await?;
    let hits = index.search(&vector, top_k, threshold).await;
    index.close().await;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    println!(
        "{}. [{:.2}] {} / unit {}",
        rank,
        hit.score,
        hit.display_name,
        hit.unit_index
    );
    println!("    excerpt: \"{}\"", excerpt(&hit.text));
    if let Some(image) = &hit.image_path {
        println!("    image: {}", image);
    }
    println!("    id: {}", hit.document_id);
    println!();
}

/// Single-line excerpt, cut on a char boundary.
fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}
