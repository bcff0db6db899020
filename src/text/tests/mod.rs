//! Text index tests — ranking, ties, delta, tombstones, merges.

use tempfile::TempDir;

use crate::stop::StopSignal;
use crate::text::TextIndex;
use crate::text::tokenizer::Language;

fn body(text: &str) -> Vec<(String, String)> {
    vec![("body".to_string(), text.to_string())]
}

fn build(tmp: &TempDir, docs: &[(u64, &str)]) -> TextIndex {
    let stop = StopSignal::default();
    TextIndex::build(
        tmp.path().join("spimi"),
        Language::English,
        4096,
        docs.iter().map(|(id, text)| (*id, body(text))),
        &stop,
    )
    .unwrap()
}

#[test]
fn ranks_by_tf_idf_cosine() {
    let tmp = TempDir::new().unwrap();
    let index = build(&tmp, &[(0, "love and light"), (1, "light and shadow")]);
    let stop = StopSignal::default();

    // "light" appears in both documents (idf 0); "love" only in doc 0.
    let hits = index.query("light love", 10, &stop).unwrap();
    let docs: Vec<u64> = hits.iter().map(|h| h.0).collect();
    assert_eq!(docs, vec![0, 1]);
    assert!(hits[0].1 > hits[1].1);

    let hits = index.query("shadow", 10, &stop).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, 1);
}

#[test]
fn equal_scores_order_by_doc_id() {
    let tmp = TempDir::new().unwrap();
    // Three identical documents and one distractor.
    let index = build(
        &tmp,
        &[(5, "red apple"), (2, "red apple"), (9, "red apple"), (7, "blue sky")],
    );
    let stop = StopSignal::default();

    let hits = index.query("apple", 10, &stop).unwrap();
    let docs: Vec<u64> = hits.iter().map(|h| h.0).collect();
    assert_eq!(docs, vec![2, 5, 9]);
}

#[test]
fn top_k_is_bounded() {
    let tmp = TempDir::new().unwrap();
    let docs: Vec<(u64, String)> = (0..50)
        .map(|i| (i, format!("common token plus word{i}")))
        .collect();
    let stop = StopSignal::default();
    let index = TextIndex::build(
        tmp.path().join("spimi"),
        Language::English,
        4096,
        docs.iter().map(|(id, text)| (*id, body(text))),
        &stop,
    )
    .unwrap();

    let hits = index.query("common token", 5, &stop).unwrap();
    assert_eq!(hits.len(), 5);
    // Ties across all 50 docs: the five smallest ids win.
    assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<u64>>(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn block_spill_and_merge_preserves_results() {
    let tmp = TempDir::new().unwrap();
    let docs: Vec<(u64, String)> = (0..200)
        .map(|i| (i, format!("shared term document number{i}")))
        .collect();
    let stop = StopSignal::default();
    // Tiny budget forces several spills (budget floor is 1024 postings).
    let index = TextIndex::build(
        tmp.path().join("spimi"),
        Language::English,
        1024,
        docs.iter().map(|(id, text)| (*id, body(text))),
        &stop,
    )
    .unwrap();

    let hits = index.query("number42", 3, &stop).unwrap();
    assert_eq!(hits[0].0, 42);
    let hits = index.query("shared", 250, &stop).unwrap();
    assert_eq!(hits.len(), 200);
}

#[test]
fn delta_documents_are_queryable_immediately() {
    let tmp = TempDir::new().unwrap();
    let mut index = build(&tmp, &[(0, "persistent document")]);
    let stop = StopSignal::default();

    index.insert_document(1, &body("fresh delta document"), &stop).unwrap();

    let hits = index.query("fresh", 10, &stop).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, 1);

    // Both share "document".
    let hits = index.query("document", 10, &stop).unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn tombstoned_documents_vanish_from_results() {
    let tmp = TempDir::new().unwrap();
    let mut index = build(&tmp, &[(0, "alpha beta"), (1, "alpha gamma")]);
    let stop = StopSignal::default();

    index.delete_document(0);
    let hits = index.query("alpha", 10, &stop).unwrap();
    assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<u64>>(), vec![1]);

    // Deleting a delta document works the same way.
    index.insert_document(2, &body("alpha delta"), &stop).unwrap();
    index.delete_document(2);
    let hits = index.query("alpha", 10, &stop).unwrap();
    assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<u64>>(), vec![1]);
}

#[test]
fn merge_delta_folds_and_drops_tombstones() {
    let tmp = TempDir::new().unwrap();
    let mut index = build(&tmp, &[(0, "alpha beta"), (1, "alpha gamma")]);
    let stop = StopSignal::default();

    index.insert_document(2, &body("alpha epsilon"), &stop).unwrap();
    index.delete_document(1);
    index.merge_delta(&stop).unwrap();

    assert_eq!(index.delta_len(), 0);
    assert_eq!(index.live_docs(), 2);

    let hits = index.query("alpha", 10, &stop).unwrap();
    assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<u64>>(), vec![0, 2]);
    let hits = index.query("gamma", 10, &stop).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn reopen_after_merge_preserves_index() {
    let tmp = TempDir::new().unwrap();
    let stop = StopSignal::default();
    {
        let mut index = build(&tmp, &[(0, "stellar wind")]);
        index.insert_document(1, &body("stellar dust"), &stop).unwrap();
        index.merge_delta(&stop).unwrap();
    }

    let index = TextIndex::open(tmp.path().join("spimi"), Language::English).unwrap();
    let hits = index.query("stellar", 10, &stop).unwrap();
    assert_eq!(hits.len(), 2);
    let hits = index.query("dust", 10, &stop).unwrap();
    assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<u64>>(), vec![1]);
}

#[test]
fn field_scoped_query_matches_only_that_field() {
    let tmp = TempDir::new().unwrap();
    let stop = StopSignal::default();
    let docs = vec![
        (
            0u64,
            vec![
                ("title".to_string(), "dark tower".to_string()),
                ("body".to_string(), "a story".to_string()),
            ],
        ),
        (
            1u64,
            vec![
                ("title".to_string(), "green hills".to_string()),
                ("body".to_string(), "dark night".to_string()),
            ],
        ),
    ];
    let index = TextIndex::build(
        tmp.path().join("spimi"),
        Language::English,
        4096,
        docs,
        &stop,
    )
    .unwrap();

    // Unscoped: both documents contain "dark" somewhere.
    let hits = index.query("dark", 10, &stop).unwrap();
    assert_eq!(hits.len(), 2);

    // Scoped to the title field: only doc 0.
    let hits = index.query("title:dark", 10, &stop).unwrap();
    assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<u64>>(), vec![0]);
}

#[test]
fn spanish_profile_folds_accents_in_both_paths() {
    let tmp = TempDir::new().unwrap();
    let stop = StopSignal::default();
    let index = TextIndex::build(
        tmp.path().join("spimi"),
        Language::Spanish,
        4096,
        vec![(0u64, body("La canción del niño"))],
        &stop,
    )
    .unwrap();

    // Query without accents still matches.
    let hits = index.query("cancion nino", 10, &stop).unwrap();
    assert_eq!(hits.len(), 1);
}
