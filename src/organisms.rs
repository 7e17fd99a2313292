use std::collections::HashMap;
use std::path::Path;

use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganismEntry {
    pub canonical: String,
    pub aliases: Vec<String>,
    pub assembly: String,
}

/// Organism names, taxon ids and short names mapped to a genome assembly.
///
/// File format: one `;`-separated line per organism, no header:
/// `canonical name;alias,alias,...;assembly`.
#[derive(Debug, Clone, Default)]
pub struct OrganismMap {
    entries: Vec<OrganismEntry>,
    index: HashMap<String, usize>,
}

impl OrganismMap {
    pub fn load(path: &Path) -> Result<Self, KiraError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|err| map_error(path, &format!("cannot open: {err}")))?;

        let mut entries = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let line = index + 1;
            let record = record.map_err(|err| map_error(path, &err.to_string()))?;
            if record.len() != 3 {
                return Err(map_error(
                    path,
                    &format!("line {line}: expected 3 fields, found {}", record.len()),
                ));
            }
            let canonical = record.get(0).unwrap_or_default().to_string();
            let assembly = record.get(2).unwrap_or_default().to_string();
            if canonical.is_empty() || assembly.is_empty() {
                return Err(map_error(
                    path,
                    &format!("line {line}: organism and assembly must not be empty"),
                ));
            }
            let aliases = record
                .get(1)
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|alias| !alias.is_empty())
                .map(str::to_string)
                .collect();
            entries.push(OrganismEntry {
                canonical,
                aliases,
                assembly,
            });
        }

        Self::from_entries(entries).map_err(|reason| map_error(path, &reason))
    }

    /// Builds the lookup index. Fails when one name points at two organisms.
    pub fn from_entries(entries: Vec<OrganismEntry>) -> Result<Self, String> {
        let mut index = HashMap::new();
        for (position, entry) in entries.iter().enumerate() {
            let keys = std::iter::once(&entry.canonical).chain(entry.aliases.iter());
            for key in keys {
                let key = sanitize_organism(key);
                match index.insert(key.clone(), position) {
                    Some(previous) if previous != position => {
                        return Err(format!(
                            "`{key}` maps to both `{}` and `{}`",
                            entries[previous].canonical, entry.canonical
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(Self { entries, index })
    }

    /// Finds an organism by canonical name or any alias.
    pub fn lookup(&self, organism: &str) -> Option<&OrganismEntry> {
        self.index
            .get(&sanitize_organism(organism))
            .and_then(|position| self.entries.get(*position))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lower-cases and replaces whitespace runs with `_`.
pub fn sanitize_organism(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

fn map_error(path: &Path, reason: &str) -> KiraError {
    KiraError::OrganismMap {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn lookup_by_alias_taxon_and_canonical_name() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("genome_assemblies.csv");
        std::fs::write(
            &path,
            "# organism;aliases;assembly\n\
             Homo sapiens; human, 9606 ,hsapiens ;GRCh38\n\
             Mus musculus;mouse,10090;GRCm39\n",
        )
        .unwrap();

        let map = OrganismMap::load(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.lookup("9606").unwrap().canonical, "Homo sapiens");
        assert_eq!(map.lookup("HOMO   Sapiens").unwrap().assembly, "GRCh38");
        assert_eq!(map.lookup("mouse").unwrap().assembly, "GRCm39");
        assert!(map.lookup("zebrafish").is_none());
    }

    #[test]
    fn conflicting_alias_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("genome_assemblies.csv");
        std::fs::write(
            &path,
            "Homo sapiens;human;GRCh38\nPan troglodytes;human;Pan_tro_3.0\n",
        )
        .unwrap();
        assert_matches!(
            OrganismMap::load(&path),
            Err(KiraError::OrganismMap { reason, .. }) if reason.contains("`human`")
        );
    }

    #[test]
    fn malformed_line_names_line_number() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("genome_assemblies.csv");
        std::fs::write(&path, "Homo sapiens;human;GRCh38\nMus musculus;GRCm39\n").unwrap();
        let err = OrganismMap::load(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
