use std::fs;
use std::path::Path;

use assert_matches::assert_matches;

use kira_seqprep::domain::{Library, ReadOrientation, SampleMetadata};
use kira_seqprep::error::{ErrorClass, KiraError};
use kira_seqprep::intake::register_references;
use kira_seqprep::registry::SampleRegistry;
use kira_seqprep::sample_table::{TableOptions, read_sample_table};

fn write_table(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("samples.tsv");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn reads_local_and_remote_rows() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_table(
        temp.path(),
        "# exported from the lab sheet\n\
         sample\tfq1\tfq2\torganism\tlibtype\tmean\tsd\tkmer\tfq1_3p\tseqmode\n\
         wt_1\treads/wt_1_R1.fq.gz\treads/wt_1_R2.fq.gz\tHomo sapiens\tISR\t250\t50\t27\tAGATCGGAAG\tpe\n\
         ko_1\t/abs/ko_1.fq.gz\t\tMus musculus\tsf\t\t\t\t\tse\n\
         SRR1234567\t\t\t\t\t\t\t\t\t\n",
    );

    let samples = read_sample_table(&path, TableOptions::default()).unwrap();
    assert_eq!(samples.len(), 3);

    let wt = &samples[0];
    assert_eq!(wt.name.as_str(), "wt_1");
    assert_matches!(
        &wt.library,
        Library::PairedEnd { mate1, mate2 }
            if mate1 == &temp.path().join("reads/wt_1_R1.fq.gz")
                && mate2 == &temp.path().join("reads/wt_1_R2.fq.gz")
    );
    assert_eq!(wt.metadata.read_orientation, Some(ReadOrientation::ISR));
    assert_eq!(wt.metadata.fragment_length_mean, Some(250.0));
    assert_eq!(wt.metadata.salmon_kmer_size, Some(27));
    assert_eq!(wt.metadata.adapter_3p.0.as_deref(), Some("AGATCGGAAG"));

    let ko = &samples[1];
    assert_matches!(&ko.library, Library::SingleEnd { mate1 } if mate1 == Path::new("/abs/ko_1.fq.gz"));
    assert_eq!(ko.metadata.read_orientation, Some(ReadOrientation::SF));
    assert_eq!(ko.metadata.fragment_length_mean, None);

    assert_matches!(&samples[2].library, Library::Remote { accession } if accession.as_str() == "SRR1234567");
}

#[test]
fn scenario_row_without_path_rejects_whole_table() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_table(
        temp.path(),
        "sample\tfq1\n\
         good\tgood.fq.gz\n\
         broken\t\n",
    );

    let err = read_sample_table(&path, TableOptions::default()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Parse);
    assert_matches!(&err, KiraError::InvalidTable { count: 1, errors, .. } => {
        assert_matches!(&errors[0], KiraError::TableRow { row: 2, reason, .. } if reason.contains("fq1"));
    });

    let mut registry = SampleRegistry::new();
    let table_token = format!("table:{}", path.display());
    let tokens = vec![table_token.clone(), "extra.fq.gz".to_string()];
    let report = register_references(
        &mut registry,
        &tokens,
        temp.path(),
        &SampleMetadata::default(),
        TableOptions::default(),
    )
    .unwrap();
    assert_eq!(report.registered, 1);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].reference, table_token);
    let names = registry
        .successful()
        .map(|sample| sample.name.to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, ["extra"]);
}

#[test]
fn every_bad_row_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_table(
        temp.path(),
        "sample\tfq1\tfq2\tkmer\tlibtype\tseqmode\n\
         a\ta.fq\t\t32\t\t\n\
         b\tb.fq\t\t\tXYZ\t\n\
         c\t\tc2.fq\t\t\t\n\
         d\td1.fq\t\t\t\tpe\n\
         e\te.fq\t\t31\tU\tse\n",
    );
    let err = read_sample_table(&path, TableOptions::default()).unwrap_err();
    assert_matches!(err, KiraError::InvalidTable { count: 4, errors, .. } => {
        let rows = errors
            .iter()
            .map(|error| match error {
                KiraError::TableRow { row, .. } => *row,
                other => panic!("unexpected {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(rows, [1, 2, 3, 4]);
        let messages = errors.iter().map(|error| error.to_string()).collect::<Vec<_>>();
        assert!(messages[0].contains("kmer") && messages[0].contains("32"));
        assert!(messages[1].contains("libtype") && messages[1].contains("XYZ"));
        assert!(messages[2].contains("inconsistent mate pairing"));
        assert!(messages[3].contains("inconsistent mate pairing"));
    });
}

#[test]
fn header_problems_are_schema_errors() {
    let temp = tempfile::tempdir().unwrap();
    for header in ["fq1\tfq2\n", "sample\tfq1\tcolour\n", "sample\tfq1\tfq1\n"] {
        let path = write_table(temp.path(), header);
        assert_matches!(
            read_sample_table(&path, TableOptions::default()),
            Err(KiraError::TableSchema { .. }),
            "{header:?}"
        );
    }
}

#[test]
fn passthrough_columns_are_kept_when_allowed() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_table(
        temp.path(),
        "sample\tfq1\tbatch\n\
         s1\ts1.fq\tB7\n",
    );
    let options = TableOptions {
        allow_extra_columns: true,
    };
    let samples = read_sample_table(&path, options).unwrap();
    assert_eq!(samples[0].extra.get("batch").map(String::as_str), Some("B7"));
}
