//! SQLite-backed vector index.
//!
//! Stores one row per (document, unit) with the embedding as a little-endian
//! f32 BLOB. Search is brute-force cosine similarity over every stored
//! vector, which is adequate for document libraries in the tens of
//! thousands of units.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{IndexUnit, SearchHit};
use crate::traits::VectorIndex;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open the index at `path`, creating the file and table when missing.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS units (
                document_id TEXT NOT NULL,
                unit_index INTEGER NOT NULL,
                display_name TEXT NOT NULL,
                text TEXT NOT NULL,
                image_path TEXT,
                dims INTEGER NOT NULL,
                vector BLOB NOT NULL,
                PRIMARY KEY (document_id, unit_index)
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Number of stored units, optionally for one document.
    pub async fn unit_count(&self, document_id: Option<&str>) -> Result<i64> {
        let count = match document_id {
            Some(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM units WHERE document_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM units")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    pub async fn document_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(DISTINCT document_id) FROM units")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert_units(
        &self,
        document_id: &str,
        display_name: &str,
        units: &[IndexUnit],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if units.len() != vectors.len() {
            anyhow::bail!(
                "{} units but {} vectors for document {}",
                units.len(),
                vectors.len(),
                document_id
            );
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM units WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for (unit, vector) in units.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO units (document_id, unit_index, display_name, text, image_path, dims, vector)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(unit.unit_index as i64)
            .bind(display_name)
            .bind(&unit.text)
            .bind(&unit.image_path)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM units WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT document_id, unit_index, display_name, text, image_path, vector FROM units WHERE dims = ?",
        )
        .bind(query.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let unit_index: i64 = row.get("unit_index");
                SearchHit {
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                    document_id: row.get("document_id"),
                    display_name: row.get("display_name"),
                    unit_index: unit_index as u32,
                    text: row.get("text"),
                    image_path: row.get("image_path"),
                }
            })
            .filter(|hit| min_score.map_or(true, |min| hit.score >= min))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.unit_index.cmp(&b.unit_index))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(index: u32, text: &str) -> IndexUnit {
        IndexUnit {
            unit_index: index,
            text: text.to_string(),
            image_path: None,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_previous_units() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteIndex::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();

        index
            .upsert_units(
                "doc1",
                "deck.pptx",
                &[unit(1, "a"), unit(2, "b"), unit(3, "c")],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
            )
            .await
            .unwrap();
        index
            .upsert_units("doc1", "deck.pptx", &[unit(1, "a")], &[vec![1.0, 0.0]])
            .await
            .unwrap();

        assert_eq!(index.unit_count(Some("doc1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_with_threshold() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteIndex::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        index
            .upsert_units(
                "doc1",
                "deck.pptx",
                &[unit(1, "east"), unit(2, "north")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .unwrap();
        index
            .upsert_units("doc2", "notes.pdf", &[unit(1, "north-east")], &[vec![1.0, 1.0]])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.1], 10, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].text, "east");
        assert_eq!(hits[1].document_id, "doc2");

        let filtered = index.search(&[1.0, 0.0], 10, Some(0.5)).await.unwrap();
        assert_eq!(filtered.len(), 2);

        let top1 = index.search(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(top1.len(), 1);
        assert_eq!(top1[0].text, "north");
    }

    #[tokio::test]
    async fn remove_document_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteIndex::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        index
            .upsert_units("doc1", "x", &[unit(1, "a")], &[vec![1.0]])
            .await
            .unwrap();

        index.remove_document("doc1").await.unwrap();
        index.remove_document("doc1").await.unwrap();
        index.remove_document("never-existed").await.unwrap();
        assert_eq!(index.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mismatched_vectors_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteIndex::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        let err = index
            .upsert_units("doc1", "x", &[unit(1, "a"), unit(2, "b")], &[vec![1.0]])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2 units but 1 vectors"));
    }
}
