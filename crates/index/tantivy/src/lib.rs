//! Tantivy-backed `SearchIndex`.
//!
//! The index schema is derived from the enabled form fields, so it is built
//! lazily and rebuilt from scratch whenever the enabled field set changes.
//! Callers learn about a rebuild through `ensure_schema` returning `true`
//! and are expected to repopulate from the authoritative store.

use casebook_core::{CaseRecord, SearchHit, SearchIndex, SearchQuery};
use parking_lot::{Mutex, RwLock};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, STORED, STRING, TEXT};
use tantivy::{Document, Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use thiserror::Error;

const WRITER_HEAP_BYTES: usize = 50_000_000;
const MAX_HITS: usize = 100;
const FUZZY_DISTANCE: u8 = 1;

#[derive(Debug, Error)]
pub enum TantivyIndexError {
    #[error("internal: {0}")]
    Internal(String),
}

fn internal(e: impl ToString) -> TantivyIndexError {
    TantivyIndexError::Internal(e.to_string())
}

struct State {
    field_names: Vec<String>,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    id_f: Field,
    uid_f: Field,
    text_fields: Vec<Field>,
}

impl State {
    fn build(field_names: Vec<String>) -> Result<Self, TantivyIndexError> {
        let mut schema_builder = Schema::builder();
        let id_f = schema_builder.add_text_field("record_id", STRING | STORED);
        let uid_f = schema_builder.add_text_field("unique_identifier", STRING);
        let text_fields = field_names
            .iter()
            .map(|name| schema_builder.add_text_field(name, TEXT))
            .collect();
        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);
        let writer = index.writer(WRITER_HEAP_BYTES).map_err(internal)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommit)
            .try_into()
            .map_err(internal)?;
        Ok(Self {
            field_names,
            writer: Mutex::new(writer),
            reader,
            id_f,
            uid_f,
            text_fields,
        })
    }

    fn commit(&self) -> Result<(), TantivyIndexError> {
        self.writer.lock().commit().map_err(internal)?;
        // reload synchronously so a write is visible to the next search
        self.reader.reload().map_err(internal)
    }
}

pub struct TantivyRecordIndex {
    state: RwLock<Option<State>>,
}

impl TantivyRecordIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for TantivyRecordIndex {
    fn default() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }
}

impl SearchIndex for TantivyRecordIndex {
    type Error = TantivyIndexError;

    fn ensure_schema(&self, field_names: &[String]) -> Result<bool, Self::Error> {
        {
            let state = self.state.read();
            if let Some(existing) = state.as_ref() {
                if existing.field_names == field_names {
                    return Ok(false);
                }
            }
        }
        let mut state = self.state.write();
        // double-check under the write lock
        if let Some(existing) = state.as_ref() {
            if existing.field_names == field_names {
                return Ok(false);
            }
        }
        *state = Some(State::build(field_names.to_vec())?);
        Ok(true)
    }

    fn index(&self, record: &CaseRecord) -> Result<(), Self::Error> {
        let state = self.state.read();
        let state = state
            .as_ref()
            .ok_or_else(|| internal("schema not initialised"))?;
        let id = record
            .id
            .as_deref()
            .ok_or_else(|| internal("record has no id"))?;

        let mut doc = Document::default();
        doc.add_text(state.id_f, id);
        if let Some(uid) = record.unique_identifier.as_deref() {
            doc.add_text(state.uid_f, uid.to_lowercase());
        }
        for (name, field) in state.field_names.iter().zip(&state.text_fields) {
            if let Some(value) = record.field(name) {
                doc.add_text(*field, value);
            }
        }

        {
            let writer = state.writer.lock();
            writer.delete_term(Term::from_field_text(state.id_f, id));
            writer.add_document(doc).map_err(internal)?;
        }
        state.commit()
    }

    fn remove_all(&self) -> Result<(), Self::Error> {
        let state = self.state.read();
        let Some(state) = state.as_ref() else {
            return Ok(());
        };
        state
            .writer
            .lock()
            .delete_all_documents()
            .map_err(internal)?;
        state.commit()
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, Self::Error> {
        let state = self.state.read();
        let state = state
            .as_ref()
            .ok_or_else(|| internal("schema not initialised"))?;

        // every whitespace token must match somewhere: the identifier
        // exactly, or any text field exactly / fuzzily / as a fuzzy prefix
        let mut musts: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for token in query.query.trim().to_lowercase().split_whitespace() {
            let mut shoulds: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            let uid_term = Term::from_field_text(state.uid_f, token);
            shoulds.push((
                Occur::Should,
                Box::new(TermQuery::new(uid_term, IndexRecordOption::Basic)),
            ));
            for field in &state.text_fields {
                let term = Term::from_field_text(*field, token);
                shoulds.push((
                    Occur::Should,
                    Box::new(TermQuery::new(term.clone(), IndexRecordOption::Basic)),
                ));
                shoulds.push((
                    Occur::Should,
                    Box::new(FuzzyTermQuery::new(term.clone(), FUZZY_DISTANCE, true)),
                ));
                shoulds.push((
                    Occur::Should,
                    Box::new(FuzzyTermQuery::new_prefix(term, FUZZY_DISTANCE, true)),
                ));
            }
            musts.push((Occur::Must, Box::new(BooleanQuery::from(shoulds))));
        }
        if musts.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = state.reader.searcher();
        let top_docs = searcher
            .search(
                &BooleanQuery::from(musts),
                &TopDocs::with_limit(MAX_HITS),
            )
            .map_err(internal)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let retrieved = searcher.doc(addr).map_err(internal)?;
            let id = retrieved
                .get_first(state.id_f)
                .and_then(|value| value.as_text())
                .ok_or_else(|| internal("indexed document has no record_id"))?;
            hits.push(SearchHit {
                id: id.to_string(),
                score,
            });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_fields() -> Vec<String> {
        vec!["name".to_string(), "last_known_location".to_string()]
    }

    fn record(id: &str, uid: &str, name: &str) -> CaseRecord {
        let mut record = CaseRecord::new();
        record.id = Some(id.to_string());
        record.unique_identifier = Some(uid.to_string());
        record.set_field("name", name);
        record
    }

    fn hit_ids(index: &TantivyRecordIndex, query: &str) -> Vec<String> {
        index
            .search(&SearchQuery::new(query))
            .unwrap()
            .into_iter()
            .map(|hit| hit.id)
            .collect()
    }

    fn populated() -> TantivyRecordIndex {
        let index = TantivyRecordIndex::new();
        assert!(index.ensure_schema(&schema_fields()).unwrap());
        index
            .index(&record("rec_1", "someuserlon1", "Mohammed Smith"))
            .unwrap();
        index
            .index(&record("rec_2", "someuserlon2", "Muhammed Jones"))
            .unwrap();
        index
            .index(&record("rec_3", "someuserlon3", "Muhammad Brown"))
            .unwrap();
        index
            .index(&record("rec_4", "someuserlon4", "Ramirez Aguilar"))
            .unwrap();
        index
    }

    #[test]
    fn ensure_schema_reports_rebuilds() {
        let index = TantivyRecordIndex::new();
        assert!(index.ensure_schema(&schema_fields()).unwrap());
        assert!(!index.ensure_schema(&schema_fields()).unwrap());
        assert!(index
            .ensure_schema(&["name".to_string(), "origin".to_string()])
            .unwrap());
    }

    #[test]
    fn finds_fuzzy_spelling_variants() {
        let index = populated();
        let ids = hit_ids(&index, "Muhammed");
        assert!(ids.contains(&"rec_1".to_string()));
        assert!(ids.contains(&"rec_2".to_string()));
        assert!(ids.contains(&"rec_3".to_string()));
        assert!(!ids.contains(&"rec_4".to_string()));
    }

    #[test]
    fn finds_prefix_matches() {
        let index = populated();
        let ids = hit_ids(&index, "Rami");
        assert_eq!(ids, ["rec_4"]);
    }

    #[test]
    fn finds_exact_unique_identifier() {
        let index = populated();
        let ids = hit_ids(&index, "someuserlon2");
        assert_eq!(ids, ["rec_2"]);
    }

    #[test]
    fn all_tokens_must_match() {
        let index = populated();
        let ids = hit_ids(&index, "Ramirez Aguilar");
        assert_eq!(ids, ["rec_4"]);
        assert!(hit_ids(&index, "Ramirez Nothere").is_empty());
    }

    #[test]
    fn reindexing_a_record_replaces_its_document() {
        let index = populated();
        index
            .index(&record("rec_4", "someuserlon4", "Renamed Person"))
            .unwrap();
        assert!(hit_ids(&index, "Ramirez").is_empty());
        assert_eq!(hit_ids(&index, "Renamed"), ["rec_4"]);
    }

    #[test]
    fn remove_all_empties_the_index() {
        let index = populated();
        index.remove_all().unwrap();
        assert!(hit_ids(&index, "Mohammed").is_empty());
    }

    #[test]
    fn unindexed_fields_are_not_searchable() {
        let index = TantivyRecordIndex::new();
        index.ensure_schema(&["name".to_string()]).unwrap();
        let mut r = record("rec_9", "uid9", "Visible");
        r.set_field("secret_notes", "Zanzibar");
        index.index(&r).unwrap();
        assert!(hit_ids(&index, "Zanzibar").is_empty());
        assert_eq!(hit_ids(&index, "Visible"), ["rec_9"]);
    }
}
