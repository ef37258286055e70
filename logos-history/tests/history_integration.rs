//! End-to-end history tests against real on-disk storage.
//!
//! Verifies:
//! - reconstructing seq k equals the live model right after operation k
//! - replay is associative across snapshot boundaries
//! - undo logs a new operation and leaves earlier versions intact
//! - cadence N over 2N+1 operations leaves snapshots at N and 2N
//! - appends are gap-free and concurrent duplicates have exactly one winner
//! - history survives closing and reopening storage

use logos_docx::{
    load_document, plan, write_package, DocumentModel, DocxError, Intent, NodeId, NodeKind,
    NodeTemplate, Operation,
};
use futures_util::poll;
use logos_history::{DocumentProcessor, HistoryConfig, HistoryError, SessionHandle};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Heading, body paragraph, empty paragraph, one-cell table.
fn report_package() -> Vec<u8> {
    let mut model = DocumentModel::empty(Uuid::new_v4());
    model
        .append_block(
            &NodeTemplate::paragraph()
                .with_format("pStyle", "Heading1")
                .with_child(NodeTemplate::run("Quarterly report")),
        )
        .unwrap();
    model
        .append_block(&NodeTemplate::paragraph_with_text("Revenue grew this quarter."))
        .unwrap();
    model.append_block(&NodeTemplate::paragraph()).unwrap();
    model
        .append_block(
            &NodeTemplate::new(NodeKind::Table).with_child(
                NodeTemplate::new(NodeKind::TableRow).with_child(
                    NodeTemplate::new(NodeKind::TableCell)
                        .with_child(NodeTemplate::paragraph_with_text("cell")),
                ),
            ),
        )
        .unwrap();
    write_package(&model).unwrap()
}

fn single_empty_paragraph() -> Vec<u8> {
    let mut model = DocumentModel::empty(Uuid::new_v4());
    model.append_block(&NodeTemplate::paragraph()).unwrap();
    write_package(&model).unwrap()
}

fn processor(dir: &TempDir, cadence: u64) -> DocumentProcessor {
    DocumentProcessor::new(HistoryConfig::for_testing(dir.path()).with_cadence(cadence)).unwrap()
}

async fn model(processor: &DocumentProcessor, handle: SessionHandle) -> DocumentModel {
    processor.current_model(handle).await.unwrap()
}

fn first_run(model: &DocumentModel, paragraph: NodeId) -> NodeId {
    model.children(paragraph)[0]
}

/// Text of block `index` in a package produced by `get_version`.
fn block_text(bytes: Vec<u8>, index: usize) -> String {
    let model = load_document(bytes, Uuid::nil()).unwrap();
    model.text_of(model.blocks()[index])
}

// ─── Replay / live equivalence ───────────────────────────────────────────────

#[tokio::test]
async fn test_every_version_matches_live_model() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 3);
    let handle = processor.open(report_package()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();

    let mut live = vec![model(&processor, handle).await];
    let m = live[0].clone();
    let [heading, body, _empty, _table] = m.blocks() else {
        panic!("fixture has four blocks");
    };
    let (heading, body) = (*heading, *body);
    let heading_run = first_run(&m, heading);
    let body_run = first_run(&m, body);

    processor.insert_text(handle, body, 7, " really").await.unwrap();
    live.push(model(&processor, handle).await);
    processor
        .set_format(handle, heading_run, [("b", Some("")), ("color", Some("1F4E79"))])
        .await
        .unwrap();
    live.push(model(&processor, handle).await);
    let inserted = processor.current_model(handle).await.unwrap().next_node_id();
    processor
        .insert_node(handle, m.root(), 1, NodeTemplate::paragraph_with_text("Summary"))
        .await
        .unwrap();
    live.push(model(&processor, handle).await);
    processor.move_node(handle, NodeId(inserted), m.root(), 4).await.unwrap();
    live.push(model(&processor, handle).await);
    processor.delete_text(handle, body_run, 0, 8).await.unwrap();
    live.push(model(&processor, handle).await);
    let blocks = model(&processor, handle).await.blocks().to_vec();
    processor.delete_range(handle, blocks[1], blocks[2]).await.unwrap();
    live.push(model(&processor, handle).await);
    processor.undo(handle).await.unwrap();
    live.push(model(&processor, handle).await);
    processor.redo(handle).await.unwrap();
    live.push(model(&processor, handle).await);
    processor
        .set_format(handle, heading, [("pStyle", None::<&str>)])
        .await
        .unwrap();
    live.push(model(&processor, handle).await);

    processor.history().flush_snapshots().await;
    assert_eq!(processor.history().list_snapshots(doc).unwrap(), vec![0, 3, 6, 9]);

    for (k, expected) in live.iter().enumerate() {
        let rebuilt = processor.reconstruct(doc, k as u64).await.unwrap();
        assert_eq!(rebuilt.model.revision(), k as u64);
        assert!(rebuilt.model.structurally_eq(expected), "version {k} diverged");
        assert_eq!(rebuilt.snapshot_seq, k as u64 / 3 * 3);
    }
}

#[tokio::test]
async fn test_replay_is_associative_across_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 4);
    let handle = processor.open(report_package()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();
    let body = model(&processor, handle).await.blocks()[1];

    for i in 0..11 {
        processor.insert_text(handle, body, i, "+").await.unwrap();
    }
    processor.history().flush_snapshots().await;

    let history = processor.history();
    for (a, b) in [(0, 5), (2, 9), (7, 11)] {
        let mut staged = history.reconstruct(doc, a).await.unwrap().model;
        history.replay_onto(&mut staged, b).await.unwrap();
        let direct = history.reconstruct(doc, b).await.unwrap().model;
        assert!(staged.structurally_eq(&direct), "replay {a}..{b} diverged");
    }
}

// ─── Undo ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hello_then_undo() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 100);
    let handle = processor.open(single_empty_paragraph()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();
    let p = model(&processor, handle).await.blocks()[0];

    assert_eq!(processor.insert_text(handle, p, 0, "Hello").await.unwrap(), 1);
    assert_eq!(block_text(processor.get_version(doc, 1).await.unwrap(), 0), "Hello");

    assert_eq!(processor.undo(handle).await.unwrap(), 2);
    assert_eq!(block_text(processor.get_version(doc, 2).await.unwrap(), 0), "");
    // Undo never rewrites history.
    assert_eq!(block_text(processor.get_version(doc, 1).await.unwrap(), 0), "Hello");
    assert_eq!(processor.history().head(doc).unwrap(), 2);
}

#[tokio::test]
async fn test_undo_restores_every_kind() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 100);
    let handle = processor.open(report_package()).await.unwrap();
    let m = model(&processor, handle).await;
    let body = m.blocks()[1];
    let run = first_run(&m, body);
    let cell = m.nodes_of_kind(NodeKind::TableCell)[0];

    let intents = vec![
        Intent::insert_text(run, 3, "xyz"),
        Intent::DeleteText { run, offset: 0, len: 7 },
        Intent::set_format(body, [("jc", Some("center"))]),
        Intent::InsertNode { parent: m.root(), index: 0, template: NodeTemplate::paragraph_with_text("new") },
        Intent::DeleteRange { start: m.blocks()[0], end: m.blocks()[2] },
        Intent::MoveNode { node: body, new_parent: cell, index: 1 },
    ];
    for intent in intents {
        let before = model(&processor, handle).await;
        processor.apply_operation(handle, intent.clone()).await.unwrap();
        assert!(!model(&processor, handle).await.structurally_eq(&before), "{intent:?} was a no-op");
        processor.undo(handle).await.unwrap();
        assert!(model(&processor, handle).await.structurally_eq(&before), "{intent:?} not undone");
    }
}

#[tokio::test]
async fn test_cycle_is_rejected_before_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 100);
    let handle = processor.open(report_package()).await.unwrap();
    let m = model(&processor, handle).await;
    let table = m.blocks()[3];
    let cell = m.nodes_of_kind(NodeKind::TableCell)[0];

    let err = processor.move_node(handle, table, cell, 0).await.unwrap_err();
    assert!(matches!(err, HistoryError::Docx(DocxError::InvalidStructuralEdit(_))));
    assert!(model(&processor, handle).await.structurally_eq(&m));
    assert_eq!(processor.document_info(handle).await.unwrap().seq, 0);
}

// ─── Snapshot cadence ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cadence_over_two_n_plus_one_ops() {
    const N: u64 = 5;
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, N);
    let handle = processor.open_empty().await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();
    let root = model(&processor, handle).await.root();

    processor
        .insert_node(handle, root, 0, NodeTemplate::paragraph_with_text(""))
        .await
        .unwrap();
    let p = model(&processor, handle).await.blocks()[0];
    for i in 1..(2 * N + 1) as usize {
        processor.insert_text(handle, p, i - 1, "n").await.unwrap();
    }
    processor.history().flush_snapshots().await;

    assert_eq!(processor.history().head(doc).unwrap(), 2 * N + 1);
    assert_eq!(processor.history().list_snapshots(doc).unwrap(), vec![N, 2 * N]);

    let rebuilt = processor.reconstruct(doc, 2 * N + 1).await.unwrap();
    assert_eq!(rebuilt.snapshot_seq, 2 * N);
    assert_eq!(rebuilt.replayed, 1);
    assert!(rebuilt.model.structurally_eq(&model(&processor, handle).await));
}

// ─── Sequencing ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_out_of_order_append_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 100);
    let handle = processor.open(report_package()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();
    let body = model(&processor, handle).await.blocks()[1];
    processor.insert_text(handle, body, 0, "a").await.unwrap();
    processor.insert_text(handle, body, 0, "b").await.unwrap();

    let planned = plan(&model(&processor, handle).await, &Intent::insert_text(body, 0, "c")).unwrap();
    for seq in [1, 2, 5] {
        let err = processor
            .history()
            .append(Operation::new(seq, doc, planned.clone()))
            .await
            .unwrap_err();
        assert_eq!(err, HistoryError::OutOfOrderSequence { document_id: doc, expected: 3, got: seq });
    }
    assert_eq!(processor.history().log().logged_seqs(doc).unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_concurrent_duplicate_append_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 100);
    let handle = processor.open(report_package()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();
    let m = model(&processor, handle).await;
    let planned = plan(&m, &Intent::insert_text(m.blocks()[1], 0, "race")).unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let history = Arc::clone(processor.history());
            let op = Operation::new(1, doc, planned.clone());
            tokio::spawn(async move { history.append(op).await })
        })
        .collect();
    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(HistoryError::OutOfOrderSequence { expected: 2, got: 1, .. })
    )));
}

#[tokio::test]
async fn test_session_rejects_its_seq_after_external_append() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 100);
    let handle = processor.open(report_package()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();
    let m = model(&processor, handle).await;
    let body = m.blocks()[1];

    let planned = plan(&m, &Intent::insert_text(body, 0, "theirs")).unwrap();
    processor.history().append(Operation::new(1, doc, planned)).await.unwrap();

    let err = processor.insert_text(handle, body, 0, "mine").await.unwrap_err();
    assert!(matches!(err, HistoryError::OutOfOrderSequence { .. }));
    assert!(model(&processor, handle).await.structurally_eq(&m));
}

// ─── Versions and sessions ───────────────────────────────────────────────────

#[tokio::test]
async fn test_version_zero_round_trips_the_import() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 100);
    let package = report_package();
    let handle = processor.open(package.clone()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();

    let bytes = processor.get_version(doc, 0).await.unwrap();
    let original = load_document(package, doc).unwrap();
    let reloaded = load_document(bytes, doc).unwrap();
    assert!(reloaded.structurally_eq(&original));

    let err = processor.get_version(doc, 1).await.unwrap_err();
    assert_eq!(err, HistoryError::SequenceNotFound { document_id: doc, seq: 1, head: 0 });
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (doc, expected) = {
        let processor = processor(&dir, 2);
        let handle = processor.open(report_package()).await.unwrap();
        let doc = processor.document_id(handle).await.unwrap();
        let body = model(&processor, handle).await.blocks()[1];
        for word in ["one ", "two ", "three "] {
            processor.insert_text(handle, body, 0, word).await.unwrap();
        }
        let expected = model(&processor, handle).await;
        processor.shutdown().await.unwrap();
        (doc, expected)
    };

    let processor = processor(&dir, 2);
    let handle = processor.resume(doc).await.unwrap();
    let resumed = model(&processor, handle).await;
    assert_eq!(resumed.revision(), 3);
    assert!(resumed.structurally_eq(&expected));

    let body = resumed.blocks()[1];
    assert_eq!(processor.insert_text(handle, body, 0, "four ").await.unwrap(), 4);
    assert_eq!(block_text(processor.get_version(doc, 2).await.unwrap(), 1), "two one Revenue grew this quarter.");
}

#[tokio::test]
async fn test_cancelled_reconstruction_leaves_session_intact() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(&dir, 1000);
    let handle = processor.open(report_package()).await.unwrap();
    let doc = processor.document_id(handle).await.unwrap();
    let body = model(&processor, handle).await.blocks()[1];
    for i in 0..200 {
        processor.insert_text(handle, body, i, "x").await.unwrap();
    }

    // Dropped while loading the base snapshot, before any op is replayed.
    let mut rebuild = Box::pin(processor.get_version(doc, 200));
    assert!(poll!(&mut rebuild).is_pending());
    drop(rebuild);

    assert_eq!(processor.insert_text(handle, body, 0, "y").await.unwrap(), 201);
    let rebuilt = processor.reconstruct(doc, 201).await.unwrap();
    assert!(rebuilt.model.structurally_eq(&model(&processor, handle).await));
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let processor = Arc::new(processor(&dir, 10));
    let handles = vec![
        processor.open(report_package()).await.unwrap(),
        processor.open(report_package()).await.unwrap(),
        processor.open_empty().await.unwrap(),
    ];

    let tasks: Vec<_> = handles
        .iter()
        .map(|&handle| {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                let root = processor.current_model(handle).await.unwrap().root();
                for i in 0..20 {
                    processor
                        .insert_node(handle, root, 0, NodeTemplate::paragraph_with_text(format!("p{i}")))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for handle in handles {
        let info = processor.document_info(handle).await.unwrap();
        assert_eq!(info.seq, 20);
        assert_eq!(processor.history().head(info.document_id).unwrap(), 20);
    }
    processor.shutdown().await.unwrap();
}
