use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::domain::{SampleDescriptor, SampleMetadata};
use crate::error::KiraError;
use crate::reference::{ParsedReference, anchor_library, anchor_path, parse_reference};
use crate::registry::SampleRegistry;
use crate::sample_table::{TableOptions, read_sample_table};

/// A reference token that could not be turned into samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedReference {
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub registered: usize,
    pub rejected: Vec<RejectedReference>,
}

/// Parses every reference token and registers the resulting samples.
///
/// Relative paths resolve against `anchor`. Values in `explicit` fill fields
/// that neither the token nor the table row set. A token that fails to parse
/// (or a table that fails to read) is rejected on its own and the remaining
/// tokens are still registered. Duplicate sample names fail the whole intake
/// and leave the registry untouched.
pub fn register_references(
    registry: &mut SampleRegistry,
    tokens: &[String],
    anchor: &Path,
    explicit: &SampleMetadata,
    options: TableOptions,
) -> Result<IntakeReport, KiraError> {
    let mut accepted: Vec<SampleDescriptor> = Vec::new();
    let mut seen = registry
        .iter()
        .map(|entry| entry.descriptor.name.clone())
        .collect::<HashSet<_>>();
    let mut rejected = Vec::new();
    let mut duplicates = Vec::new();

    for token in tokens {
        let parsed = parse_reference(token).and_then(|parsed| match parsed {
            ParsedReference::Sample(mut descriptor) => {
                anchor_library(&mut descriptor, anchor);
                Ok(vec![descriptor])
            }
            ParsedReference::Table(path) => {
                let path = anchor_path(&path, anchor);
                tracing::debug!(table = %path.display(), "reading sample table");
                read_sample_table(&path, options)
            }
        });
        let descriptors = match parsed {
            Ok(descriptors) => descriptors,
            Err(err) => {
                tracing::warn!(reference = %token, error = %err, "sample reference rejected");
                rejected.push(RejectedReference {
                    reference: token.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        for mut descriptor in descriptors {
            if !seen.insert(descriptor.name.clone()) {
                duplicates.push(KiraError::DuplicateSample(descriptor.name.to_string()));
                continue;
            }
            descriptor.metadata.fill_missing(explicit);
            accepted.push(descriptor);
        }
    }

    match duplicates.len() {
        0 => {}
        1 => return Err(duplicates.remove(0)),
        count => {
            return Err(KiraError::DuplicateSamples {
                count,
                errors: duplicates,
            });
        }
    }

    let registered = accepted.len();
    for descriptor in accepted {
        tracing::debug!(sample = %descriptor.name, layout = descriptor.library.layout(), "registered sample");
        registry.insert(descriptor)?;
    }
    if !rejected.is_empty() {
        tracing::warn!(
            registered,
            rejected = rejected.len(),
            "some sample references were rejected"
        );
    }
    Ok(IntakeReport {
        registered,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::Library;

    #[test]
    fn duplicate_names_across_tokens_register_nothing() {
        let mut registry = SampleRegistry::new();
        let tokens = vec!["a@x.fq".to_string(), "a@y.fq".to_string()];
        let err = register_references(
            &mut registry,
            &tokens,
            Path::new("/data"),
            &SampleMetadata::default(),
            TableOptions::default(),
        )
        .unwrap_err();
        assert_matches!(err, KiraError::DuplicateSample(name) if name == "a");
        assert!(registry.is_empty());
    }

    #[test]
    fn every_duplicate_is_reported() {
        let mut registry = SampleRegistry::new();
        let tokens = ["a@x.fq", "a@y.fq", "b.fq", "b.fq.gz", "c.fq"]
            .map(String::from)
            .to_vec();
        let err = register_references(
            &mut registry,
            &tokens,
            Path::new("/data"),
            &SampleMetadata::default(),
            TableOptions::default(),
        )
        .unwrap_err();
        assert_matches!(err, KiraError::DuplicateSamples { count: 2, errors } => {
            assert_matches!(&errors[1], KiraError::DuplicateSample(name) if name == "b");
        });
        assert!(registry.is_empty());
    }

    #[test]
    fn table_rows_keep_their_values_over_explicit_ones() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("samples.tsv"),
            "sample\tfq1\torganism\n\
             s1\treads/s1.fq.gz\tMus musculus\n\
             s2\treads/s2.fq.gz\t\n",
        )
        .unwrap();
        let explicit = SampleMetadata {
            source: Some("Homo sapiens".to_string()),
            ..SampleMetadata::default()
        };

        let mut registry = SampleRegistry::new();
        let tokens = vec!["table:samples.tsv".to_string()];
        let report =
            register_references(&mut registry, &tokens, temp.path(), &explicit, TableOptions::default())
                .unwrap();
        assert_eq!(report.registered, 2);
        assert!(report.rejected.is_empty());

        let sources = registry
            .successful()
            .map(|sample| sample.metadata.source.clone().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(sources, ["Mus musculus", "Homo sapiens"]);
        let first = registry.successful().next().unwrap();
        assert_matches!(&first.library, Library::SingleEnd { mate1 } if mate1 == &temp.path().join("reads/s1.fq.gz"));
    }
}
