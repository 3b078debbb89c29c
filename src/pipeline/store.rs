use std::path::Path;

use rusqlite::{Connection, params};

use crate::error::TuneResult;
use crate::model::{MetaFilter, RetrievedDoc};
use crate::pipeline::embedding::{
    EMBEDDING_DIM, EncoderRole, cosine_similarity, decode_embedding_blob, embed_text,
    encode_embedding_blob,
};
use crate::pipeline::split::Passage;

/// Passage index shared by every pipeline built against the same database.
pub struct PassageStore {
    connection: Connection,
}

impl PassageStore {
    pub fn open(path: &Path) -> TuneResult<Self> {
        let connection = Connection::open(path)?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> TuneResult<Self> {
        let connection = Connection::open_in_memory()?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    /// Drop every passage and its embeddings and metadata.
    pub fn clear(&mut self) -> TuneResult<()> {
        self.connection.execute_batch(
            "
            DELETE FROM passage_meta;
            DELETE FROM text_fts;
            DELETE FROM title_fts;
            DELETE FROM passages;
            ",
        )?;
        Ok(())
    }

    pub fn insert_passages(&mut self, passages: &[Passage]) -> TuneResult<usize> {
        let tx = self.connection.transaction()?;
        {
            let mut insert_passage = tx.prepare(
                "INSERT INTO passages(doc_id, name, title, text) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_text =
                tx.prepare("INSERT INTO text_fts(passage_id, text) VALUES (?1, ?2)")?;
            let mut insert_title =
                tx.prepare("INSERT INTO title_fts(passage_id, title) VALUES (?1, ?2)")?;
            let mut insert_meta = tx.prepare(
                "INSERT INTO passage_meta(passage_id, key, value) VALUES (?1, ?2, ?3)",
            )?;

            for passage in passages {
                insert_passage.execute(params![
                    passage.doc_id,
                    passage.name,
                    passage.title,
                    passage.text
                ])?;
                let passage_id = tx.last_insert_rowid();
                insert_text.execute(params![passage_id, passage.text])?;
                insert_title.execute(params![passage_id, passage.title])?;
                for (key, value) in &passage.meta {
                    insert_meta.execute(params![passage_id, key, value])?;
                }
            }
        }
        tx.commit()?;
        Ok(passages.len())
    }

    /// Compute and store an embedding for every passage lacking one.
    pub fn update_embeddings(&mut self, include_title: bool) -> TuneResult<usize> {
        let pending = {
            let mut statement = self.connection.prepare(
                "SELECT passage_id, title, text FROM passages WHERE embedding IS NULL ORDER BY passage_id",
            )?;
            let rows = statement.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            rows.collect::<Result<Vec<(i64, String, String)>, rusqlite::Error>>()?
        };

        let role = if include_title {
            EncoderRole::Passage
        } else {
            EncoderRole::Symmetric
        };
        let tx = self.connection.transaction()?;
        {
            let mut update =
                tx.prepare("UPDATE passages SET embedding = ?2 WHERE passage_id = ?1")?;
            for (passage_id, title, text) in &pending {
                let payload = if include_title && !title.is_empty() {
                    format!("{title}\n\n{text}")
                } else {
                    text.clone()
                };
                let vector = embed_text(&payload, role, EMBEDDING_DIM);
                update.execute(params![passage_id, encode_embedding_blob(&vector)])?;
            }
        }
        tx.commit()?;
        Ok(pending.len())
    }

    #[cfg(test)]
    pub fn passage_count(&self) -> TuneResult<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM passages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// BM25 ranking over passage text; best first.
    pub fn search_text(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<Vec<RetrievedDoc>> {
        self.search_fts("text_fts", query, limit, filter)
    }

    /// BM25 ranking over passage titles; best first.
    pub fn search_titles(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<Vec<RetrievedDoc>> {
        self.search_fts("title_fts", query, limit, filter)
    }

    fn search_fts(
        &self,
        table: &str,
        query: &str,
        limit: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<Vec<RetrievedDoc>> {
        let fts_query = to_fts_query(query);
        if fts_query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "
            SELECT p.doc_id, p.name, p.text, bm25({table})
            FROM {table}
            JOIN passages p ON p.passage_id = {table}.passage_id
            WHERE
              {table} MATCH ?1
              AND (?2 IS NULL OR EXISTS (
                SELECT 1 FROM passage_meta m
                WHERE m.passage_id = p.passage_id AND m.key = ?2 AND m.value = ?3
              ))
            ORDER BY bm25({table}) ASC, p.passage_id ASC
            LIMIT ?4
            "
        );
        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement.query_map(
            params![
                fts_query,
                filter.map(|value| value.field.as_str()),
                filter.map(|value| value.value.as_str()),
                limit as i64
            ],
            |row| {
                Ok(RetrievedDoc {
                    doc_id: row.get(0)?,
                    name: row.get(1)?,
                    text: row.get(2)?,
                    // bm25() is lower-is-better
                    score: -row.get::<_, f64>(3)?,
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<RetrievedDoc>, rusqlite::Error>>()?)
    }

    /// Cosine ranking of stored embeddings against the embedded query.
    pub fn search_embeddings(
        &self,
        query: &str,
        role: EncoderRole,
        limit: usize,
        filter: Option<&MetaFilter>,
    ) -> TuneResult<Vec<RetrievedDoc>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_vector = embed_text(query, role, EMBEDDING_DIM);

        let mut statement = self.connection.prepare(
            "
            SELECT p.passage_id, p.doc_id, p.name, p.text, p.embedding
            FROM passages p
            WHERE
              p.embedding IS NOT NULL
              AND (?1 IS NULL OR EXISTS (
                SELECT 1 FROM passage_meta m
                WHERE m.passage_id = p.passage_id AND m.key = ?1 AND m.value = ?2
              ))
            ",
        )?;
        let mut rows = statement.query(params![
            filter.map(|value| value.field.as_str()),
            filter.map(|value| value.value.as_str()),
        ])?;

        let mut scored = Vec::<(i64, RetrievedDoc)>::new();
        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(4)?;
            let Some(vector) = decode_embedding_blob(&blob, EMBEDDING_DIM) else {
                continue;
            };
            scored.push((
                row.get(0)?,
                RetrievedDoc {
                    doc_id: row.get(1)?,
                    name: row.get(2)?,
                    text: row.get(3)?,
                    score: cosine_similarity(&query_vector, &vector),
                },
            ));
        }

        scored.sort_by(|left, right| {
            right
                .1
                .score
                .total_cmp(&left.1.score)
                .then(left.0.cmp(&right.0))
        });
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, doc)| doc).collect())
    }
}

fn configure_connection(connection: &Connection) -> TuneResult<()> {
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> TuneResult<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS passages (
          passage_id INTEGER PRIMARY KEY AUTOINCREMENT,
          doc_id TEXT NOT NULL,
          name TEXT NOT NULL,
          title TEXT NOT NULL DEFAULT '',
          text TEXT NOT NULL,
          embedding BLOB
        );

        CREATE TABLE IF NOT EXISTS passage_meta (
          passage_id INTEGER NOT NULL,
          key TEXT NOT NULL,
          value TEXT NOT NULL,
          FOREIGN KEY(passage_id) REFERENCES passages(passage_id)
        );

        CREATE INDEX IF NOT EXISTS idx_passage_meta_key_value ON passage_meta(key, value);
        CREATE INDEX IF NOT EXISTS idx_passages_doc_id ON passages(doc_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS text_fts USING fts5(
          passage_id UNINDEXED,
          text
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS title_fts USING fts5(
          passage_id UNINDEXED,
          title
        );
        ",
    )?;
    Ok(())
}

/// Quoted terms joined with OR, so a passage needs only one query term.
fn to_fts_query(query_text: &str) -> String {
    query_text
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"", token.to_lowercase()))
        .collect::<Vec<String>>()
        .join(" OR ")
}
