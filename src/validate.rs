//! Value rules shared by configuration layers and sample table rows.
//!
//! Each rule returns the reason a value is rejected.

use std::path::Path;

use crate::domain::is_name_char;

pub const MAX_CORES: u32 = 1024;
pub const MAX_KMER_SIZE: u32 = 31;

pub fn cores(value: u32) -> Result<(), String> {
    if (1..=MAX_CORES).contains(&value) {
        Ok(())
    } else {
        Err(format!("must be between 1 and {MAX_CORES}"))
    }
}

pub fn at_least_one(value: u64) -> Result<(), String> {
    if value >= 1 {
        Ok(())
    } else {
        Err("must be at least 1".to_string())
    }
}

pub fn fragment_mean(value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err("must be a positive number".to_string())
    }
}

pub fn fragment_sd(value: f64) -> Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err("must be a non-negative number".to_string())
    }
}

pub fn kmer_size(value: u32) -> Result<(), String> {
    if value % 2 == 1 && value <= MAX_KMER_SIZE {
        Ok(())
    } else {
        Err(format!("must be an odd number between 1 and {MAX_KMER_SIZE}"))
    }
}

pub fn overhang(value: u32) -> Result<(), String> {
    at_least_one(u64::from(value))
}

pub fn path(value: &Path) -> Result<(), String> {
    if value.as_os_str().is_empty() {
        Err("must not be empty".to_string())
    } else {
        Ok(())
    }
}

pub fn identifier(value: &str) -> Result<(), String> {
    if !value.is_empty() && value.chars().all(is_name_char) {
        Ok(())
    } else {
        Err("may only contain letters, digits, `.`, `_` and `-`".to_string())
    }
}

pub fn email(value: &str) -> Result<(), String> {
    let rejected = || Err("must look like `user@example.org`".to_string());
    let Some((local, domain)) = value.split_once('@') else {
        return rejected();
    };
    let domain_ok = domain
        .split('.')
        .filter(|part| !part.is_empty())
        .count()
        >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if local.is_empty() || domain.contains('@') || !domain_ok || value.contains(char::is_whitespace)
    {
        return rejected();
    }
    Ok(())
}

pub fn url(value: &str) -> Result<(), String> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !value.contains(char::is_whitespace) => Ok(()),
        _ => Err("must be an http:// or https:// URL".to_string()),
    }
}

pub fn sequence(value: &str) -> Result<(), String> {
    if !value.is_empty() && value.chars().all(|ch| ch.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err("must be a nucleotide sequence".to_string())
    }
}
