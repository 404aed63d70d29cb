use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::instrument;

use crate::error::Result;

/// SQLite-backed vector store with per-assistant collections.
///
/// Collections are named by a deterministic transform of the assistant id.
/// k-NN is a brute-force L2 scan over the collection's rows, which holds up
/// fine for per-assistant corpora of document chunks; revisit if profiling
/// says otherwise.
pub struct VectorStore {
    db: Arc<Mutex<Connection>>,
}

/// One query hit: chunk text, its metadata, and the L2 distance.
pub type QueryHit = (String, serde_json::Value, f64);

impl VectorStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Deterministic collection name for an assistant.
    pub fn collection_name(assistant_id: &str) -> String {
        format!("assistant_{}", assistant_id.replace('-', "_"))
    }

    /// Insert or replace a file's chunks. Chunk ids are `<file_id>_<index>`;
    /// each metadata blob carries `file_id` and `chunk_index` alongside any
    /// caller-supplied fields.
    #[instrument(skip(self, chunks, vectors, metadatas), fields(n = chunks.len()))]
    pub fn upsert(
        &self,
        assistant_id: &str,
        file_id: &str,
        chunks: &[String],
        vectors: &[Vec<f32>],
        metadatas: &[serde_json::Value],
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        debug_assert_eq!(chunks.len(), vectors.len());

        let collection = Self::collection_name(assistant_id);
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO vector_chunks
                 (collection, chunk_id, file_id, chunk_index, text, metadata, vector)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for (i, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
                let mut metadata = metadatas
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));
                if let Some(obj) = metadata.as_object_mut() {
                    obj.insert("file_id".to_string(), serde_json::json!(file_id));
                    obj.insert("chunk_index".to_string(), serde_json::json!(i));
                }
                stmt.execute(rusqlite::params![
                    collection,
                    format!("{file_id}_{i}"),
                    file_id,
                    i as i64,
                    chunk,
                    metadata.to_string(),
                    vector_to_blob(vector),
                ])?;
            }
        }
        tx.commit()?;
        Ok(chunks.len())
    }

    /// Top-k nearest chunks by L2 distance, closest first.
    pub fn query(
        &self,
        assistant_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<QueryHit>> {
        let collection = Self::collection_name(assistant_id);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT text, metadata, vector FROM vector_chunks WHERE collection = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut hits: Vec<QueryHit> = rows
            .filter_map(|r| r.ok())
            .map(|(text, metadata_json, blob)| {
                let vector = blob_to_vector(&blob);
                let distance = l2_distance(query_vector, &vector);
                let metadata =
                    serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null);
                (text, metadata, distance)
            })
            .collect();

        hits.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    /// Remove every chunk belonging to one file.
    pub fn delete_by_file(&self, assistant_id: &str, file_id: &str) -> Result<usize> {
        let collection = Self::collection_name(assistant_id);
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM vector_chunks WHERE collection = ?1 AND file_id = ?2",
            rusqlite::params![collection, file_id],
        )?;
        Ok(n)
    }

    /// Drop an assistant's entire collection. Idempotent.
    pub fn drop_collection(&self, assistant_id: &str) -> Result<usize> {
        let collection = Self::collection_name(assistant_id);
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM vector_chunks WHERE collection = ?1",
            rusqlite::params![collection],
        )?;
        Ok(n)
    }

    /// Number of chunks stored for an assistant.
    pub fn count(&self, assistant_id: &str) -> Result<u64> {
        let collection = Self::collection_name(assistant_id);
        let db = self.db.lock().unwrap();
        let n = db.query_row(
            "SELECT COUNT(*) FROM vector_chunks WHERE collection = ?1",
            rusqlite::params![collection],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VectorStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        VectorStore::new(Arc::new(Mutex::new(conn)))
    }

    fn meta(filename: &str) -> serde_json::Value {
        serde_json::json!({ "filename": filename, "token_count": 3 })
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![0.25_f32, -1.5, 3.75];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }

    #[test]
    fn upsert_then_query_returns_nearest_first() {
        let store = store();
        store
            .upsert(
                "a-1",
                "f-1",
                &["alpha".to_string(), "beta".to_string()],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                &[meta("doc.txt"), meta("doc.txt")],
            )
            .unwrap();

        let hits = store.query("a-1", &[0.9, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "alpha");
        assert!(hits[0].2 < hits[1].2);
        assert_eq!(hits[0].1["file_id"], "f-1");
        assert_eq!(hits[0].1["chunk_index"], 0);
    }

    #[test]
    fn collections_are_isolated_per_assistant() {
        let store = store();
        store
            .upsert("a-1", "f-1", &["one".to_string()], &[vec![1.0]], &[meta("a.txt")])
            .unwrap();
        store
            .upsert("a-2", "f-2", &["two".to_string()], &[vec![1.0]], &[meta("b.txt")])
            .unwrap();

        assert_eq!(store.count("a-1").unwrap(), 1);
        let hits = store.query("a-2", &[1.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "two");
    }

    #[test]
    fn delete_by_file_removes_only_that_file() {
        let store = store();
        store
            .upsert("a-1", "f-1", &["one".to_string()], &[vec![1.0]], &[meta("a.txt")])
            .unwrap();
        store
            .upsert("a-1", "f-2", &["two".to_string()], &[vec![2.0]], &[meta("b.txt")])
            .unwrap();

        assert_eq!(store.delete_by_file("a-1", "f-1").unwrap(), 1);
        assert_eq!(store.count("a-1").unwrap(), 1);
    }

    #[test]
    fn drop_collection_is_idempotent() {
        let store = store();
        store
            .upsert("a-1", "f-1", &["one".to_string()], &[vec![1.0]], &[meta("a.txt")])
            .unwrap();
        assert_eq!(store.drop_collection("a-1").unwrap(), 1);
        assert_eq!(store.drop_collection("a-1").unwrap(), 0);
    }

    #[test]
    fn reupsert_replaces_instead_of_duplicating() {
        let store = store();
        for _ in 0..2 {
            store
                .upsert("a-1", "f-1", &["one".to_string()], &[vec![1.0]], &[meta("a.txt")])
                .unwrap();
        }
        assert_eq!(store.count("a-1").unwrap(), 1);
    }
}
