//! Raw record loading and preprocessing.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, instrument, warn};

use coursegraph_artifacts::read_json;
use coursegraph_shared::{CourseRecord, Result, TextField, normalize_code};

/// Read the crawler output (a JSON array of records).
pub fn load_raw_records(path: &Path) -> Result<Vec<CourseRecord>> {
    read_json(path)
}

/// Counts from one preprocessing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessStats {
    pub input: usize,
    pub kept: usize,
    pub without_credits: usize,
    pub empty_code: usize,
    pub duplicates: usize,
}

/// Clean raw records for the pipeline.
///
/// Drops records without credits or with an empty code, normalizes codes,
/// and keeps the first of any duplicate codes.
#[instrument(skip_all, fields(records = records.len()))]
pub fn preprocess(records: Vec<CourseRecord>) -> (Vec<CourseRecord>, PreprocessStats) {
    let mut stats = PreprocessStats {
        input: records.len(),
        ..PreprocessStats::default()
    };
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(records.len());

    for mut record in records {
        if record.credits.is_none() {
            stats.without_credits += 1;
            continue;
        }
        record.code = normalize_code(&record.code);
        if record.code.is_empty() {
            stats.empty_code += 1;
            continue;
        }
        if !seen.insert(record.code.clone()) {
            warn!(code = %record.code, "duplicate course code, keeping first occurrence");
            stats.duplicates += 1;
            continue;
        }
        out.push(record);
    }

    stats.kept = out.len();
    info!(
        kept = stats.kept,
        without_credits = stats.without_credits,
        empty_code = stats.empty_code,
        duplicates = stats.duplicates,
        "records preprocessed"
    );
    (out, stats)
}

/// Cleaned text fed to the embedding provider for one record.
pub fn embedding_text(record: &CourseRecord, columns: &[TextField]) -> String {
    coursegraph_text::concat_fields(columns.iter().map(|&field| record.text(field)))
}

/// Node ids, labels, and instructor lists aligned with `records`.
pub fn graph_columns(records: &[CourseRecord]) -> (Vec<String>, Vec<String>, Vec<Option<String>>) {
    let ids = records.iter().map(|r| r.code.clone()).collect();
    let labels = records.iter().map(|r| r.label().to_string()).collect();
    let instructors = records.iter().map(|r| r.instructors.clone()).collect();
    (ids, labels, instructors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, credits: Option<u32>) -> CourseRecord {
        CourseRecord {
            code: code.to_string(),
            credits,
            ..CourseRecord::default()
        }
    }

    #[test]
    fn drops_missing_credits_empty_codes_and_duplicates() {
        let (records, stats) = preprocess(vec![
            record(" MAC  110 ", Some(4)),
            record("MAC 121", None),
            record("   ", Some(2)),
            record("MAC 110", Some(8)),
            record("MAT 111", Some(6)),
        ]);

        let codes: Vec<&str> = records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["MAC 110", "MAT 111"]);
        assert_eq!(records[0].credits, Some(4));
        assert_eq!(
            stats,
            PreprocessStats {
                input: 5,
                kept: 2,
                without_credits: 1,
                empty_code: 1,
                duplicates: 1,
            }
        );
    }

    #[test]
    fn embedding_text_concatenates_cleaned_columns() {
        let record = CourseRecord {
            code: "X1".into(),
            objectives: Some("Study the Graphs!".into()),
            rationale: None,
            syllabus: Some("Shortest paths, trees.".into()),
            ..CourseRecord::default()
        };
        let text = embedding_text(
            &record,
            &[TextField::Objectives, TextField::Rationale, TextField::Syllabus],
        );
        assert_eq!(text, "study graphs shortest paths trees");
    }

    #[test]
    fn graph_columns_are_aligned() {
        let mut a = record("A", Some(1));
        a.title = Some("Algebra".into());
        a.instructors = Some("Ana | Bo".into());
        let b = record("B", Some(1));

        let (ids, labels, instructors) = graph_columns(&[a, b]);
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(labels, vec!["Algebra", "Unknown"]);
        assert_eq!(instructors, vec![Some("Ana | Bo".to_string()), None]);
    }

    #[test]
    fn raw_records_from_file() {
        let dir = std::env::temp_dir().join(format!("cg-records-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("output.json");
        std::fs::write(
            &path,
            r#"[{"code": "X1", "title": "A", "credits": "4", "total_workload": "120 horas"}]"#,
        )
        .unwrap();

        let records = load_raw_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_workload_hours(), Some(120));

        assert!(load_raw_records(&dir.join("missing.json")).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn numeric_codes_load_and_survive_preprocessing() {
        let dir = std::env::temp_dir().join(format!("cg-records-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("output.json");
        std::fs::write(
            &path,
            r#"[{"code": 110, "credits": "4"}, {"code": " MAC0121 ", "credits": 4}]"#,
        )
        .unwrap();

        let (records, stats) = preprocess(load_raw_records(&path).unwrap());
        assert_eq!(stats.kept, 2);
        assert_eq!(records[0].code, "110");
        assert_eq!(records[1].code, "MAC0121");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
