use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::domain::{AccessionId, Library, SampleDescriptor, SampleName};
use crate::error::KiraError;

pub const TABLE_PREFIX: &str = "table:";
pub const NAME_SEPARATOR: char = '@';
pub const MATE_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReference {
    Sample(SampleDescriptor),
    Table(PathBuf),
}

/// Classifies one raw reference token.
///
/// Rules are tried in order: table prefix, `name@` assignment, `mate1,mate2`,
/// SRA accession, single local file. Paths are returned as written; anchoring
/// them to a directory is the caller's job.
pub fn parse_reference(token: &str) -> Result<ParsedReference, KiraError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(reference_error(token, "empty reference"));
    }

    if let Some(remainder) = trimmed.strip_prefix(TABLE_PREFIX) {
        let remainder = remainder.trim();
        if remainder.is_empty() {
            return Err(reference_error(
                token,
                "ambiguous table reference: no path after `table:`",
            ));
        }
        if remainder.contains(NAME_SEPARATOR) {
            return Err(reference_error(
                token,
                "ambiguous table reference: a table cannot carry a sample name",
            ));
        }
        return Ok(ParsedReference::Table(PathBuf::from(remainder)));
    }

    let (name, remainder) = split_name(token, trimmed)?;
    let library = classify(token, remainder)?;
    let name = match name {
        Some(name) => name,
        None => derive_name(token, &library)?,
    };
    Ok(ParsedReference::Sample(SampleDescriptor::new(name, library)))
}

fn split_name<'a>(
    token: &str,
    trimmed: &'a str,
) -> Result<(Option<SampleName>, &'a str), KiraError> {
    let separators = trimmed.matches(NAME_SEPARATOR).count();
    if separators == 0 {
        return Ok((None, trimmed));
    }
    if separators > 1 {
        return Err(reference_error(token, "more than one `@` name separator"));
    }
    let (raw_name, remainder) = trimmed
        .split_once(NAME_SEPARATOR)
        .ok_or_else(|| reference_error(token, "malformed name assignment"))?;
    let raw_name = raw_name.trim();
    if raw_name.is_empty() {
        return Err(reference_error(token, "empty sample name before `@`"));
    }
    let name = raw_name.parse::<SampleName>().map_err(|_| {
        reference_error(
            token,
            &format!("sample name `{raw_name}` may only contain letters, digits, `.`, `_` and `-`"),
        )
    })?;
    let remainder = remainder.trim();
    if remainder.is_empty() {
        return Err(reference_error(token, "nothing after `@`"));
    }
    if remainder.starts_with(TABLE_PREFIX) {
        return Err(reference_error(
            token,
            "ambiguous table reference: a table cannot carry a sample name",
        ));
    }
    Ok((Some(name), remainder))
}

fn classify(token: &str, remainder: &str) -> Result<Library, KiraError> {
    match remainder.matches(MATE_SEPARATOR).count() {
        0 => {}
        1 => {
            let (mate1, mate2) = remainder
                .split_once(MATE_SEPARATOR)
                .ok_or_else(|| reference_error(token, "malformed mate pair"))?;
            let (mate1, mate2) = (mate1.trim(), mate2.trim());
            if mate1.is_empty() || mate2.is_empty() {
                return Err(reference_error(token, "empty side in mate pair"));
            }
            return Ok(Library::PairedEnd {
                mate1: PathBuf::from(mate1),
                mate2: PathBuf::from(mate2),
            });
        }
        _ => return Err(reference_error(token, "more than one comma in mate pair")),
    }

    if AccessionId::matches(remainder) {
        return Ok(Library::Remote {
            accession: remainder.parse()?,
        });
    }
    Ok(Library::SingleEnd {
        mate1: PathBuf::from(remainder),
    })
}

fn derive_name(token: &str, library: &Library) -> Result<SampleName, KiraError> {
    let source = match library {
        Library::SingleEnd { mate1 } | Library::PairedEnd { mate1, .. } => {
            mate1.to_string_lossy().into_owned()
        }
        Library::Remote { accession } => accession.to_string(),
    };
    SampleName::derive(&source)
        .map_err(|_| reference_error(token, "cannot derive a sample name; use `name@reference`"))
}

fn reference_error(token: &str, reason: &str) -> KiraError {
    KiraError::InvalidReference {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

/// Expands a leading `~` and joins relative paths onto `anchor`.
pub fn anchor_path(path: &Path, anchor: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(dirs) = BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        anchor.join(path)
    }
}

/// Anchors every read file of `descriptor` to `anchor`.
pub fn anchor_library(descriptor: &mut SampleDescriptor, anchor: &Path) {
    match &mut descriptor.library {
        Library::SingleEnd { mate1 } => *mate1 = anchor_path(mate1, anchor),
        Library::PairedEnd { mate1, mate2 } => {
            *mate1 = anchor_path(mate1, anchor);
            *mate2 = anchor_path(mate2, anchor);
        }
        Library::Remote { .. } => {}
    }
}
