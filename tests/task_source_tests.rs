//! Resuming over a previous output: the queue holds exactly the sellers not
//! yet complete.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

use allegro_enricher::output::OutputSink;
use allegro_enricher::seller::{
    EnrichedRecord, ExtractionResult, ReputationMetrics, ScoreResult, Segment, WorkItem,
};
use allegro_enricher::task_source::{self, DataSourceError};

use common::fixtures::write_input;

fn record(item: WorkItem, company: &str, nip: &str) -> EnrichedRecord {
    EnrichedRecord::new(
        item,
        ExtractionResult {
            company_name: company.to_string(),
            nip: nip.to_string(),
            ..Default::default()
        },
        ReputationMetrics::default(),
        ScoreResult { score: 0, segment: Segment::C },
    )
}

#[test]
fn test_rerun_queues_only_incomplete_sellers() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("sellers.csv");
    let output = tmp.path().join("enriched.csv");
    write_input(
        &input,
        &["category"],
        &[
            vec!["shopA", "Motoryzacja"],
            vec!["shopB", "Motoryzacja"],
            vec!["shopC", "Opony"],
            vec!["shopD", "Opony"],
        ],
    );

    // first run: everything queued, two sellers completed, one written without ids
    let first = task_source::load(&input, &output).unwrap();
    assert_eq!(first.queue.len(), 4);
    let sink = OutputSink::initialize(&output, first.schema.clone()).unwrap();
    let mut items = Vec::new();
    while let Some(item) = first.queue.pop() {
        items.push(item);
    }
    sink.write(&record(items[0].clone(), "Shop A sp. z o.o.", "1234567890")).unwrap();
    sink.write(&record(items[2].clone(), "Opony C", "5260001234")).unwrap();
    sink.write(&record(items[3].clone(), "Opony D", "")).unwrap();
    drop(sink);

    // second run over the same files
    let second = task_source::load(&input, &output).unwrap();
    let queued: HashSet<String> = second.queue.logins().into_iter().collect();
    let expected: HashSet<String> = ["shopB", "shopD"].iter().map(|s| s.to_string()).collect();
    assert_eq!(queued, expected);
    assert_eq!(second.stats.already_complete, 2);

    // the sink reopens the same file without complaint
    let reopened = OutputSink::initialize(&output, second.schema.clone());
    assert!(reopened.is_ok());
}

#[test]
fn test_seed_columns_carried_into_output() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("sellers.csv");
    let output = tmp.path().join("enriched.csv");
    write_input(&input, &["category", "address"], &[vec!["shopA", "Opony", "Radom"]]);

    let tasks = task_source::load(&input, &output).unwrap();
    let sink = Arc::new(OutputSink::initialize(&output, tasks.schema.clone()).unwrap());
    let item = tasks.queue.pop().unwrap();
    sink.write(&record(item, "Opony A", "1234567890")).unwrap();

    let rows = common::fixtures::read_output(&output);
    assert_eq!(rows[0]["category"], "Opony");
    assert_eq!(rows[0]["address"], "", "enrichment column holds the extracted value");
    assert_eq!(rows[0]["company_name"], "Opony A");
    assert_eq!(tasks.schema.iter().filter(|c| *c == "address").count(), 1);
}

#[test]
fn test_seed_registry_id_does_not_mark_seller_complete() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("sellers.csv");
    let output = tmp.path().join("enriched.csv");
    write_input(&input, &["nip"], &[vec!["shopA", "9999999999"]]);

    let first = task_source::load(&input, &output).unwrap();
    let sink = OutputSink::initialize(&output, first.schema.clone()).unwrap();
    let item = first.queue.pop().unwrap();
    sink.write(&record(item, "Shop A", "")).unwrap();
    drop(sink);

    let rows = common::fixtures::read_output(&output);
    assert_eq!(rows[0]["nip"], "");
    assert_eq!(rows[0]["company_name"], "Shop A");

    let second = task_source::load(&input, &output).unwrap();
    assert_eq!(second.queue.logins(), vec!["shopA".to_string()]);
    assert_eq!(second.stats.already_complete, 0);
}

#[test]
fn test_missing_input_reported() {
    let tmp = TempDir::new().unwrap();
    let err = task_source::load(&tmp.path().join("none.csv"), &tmp.path().join("out.csv")).unwrap_err();
    assert!(matches!(err, DataSourceError::InputMissing(_)));
    assert!(err.to_string().contains("none.csv"));
}
