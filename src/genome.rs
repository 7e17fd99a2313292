use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::cancel::CancelToken;
use crate::error::KiraError;
use crate::organisms::sanitize_organism;

static HREF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"?]+)""#).unwrap());

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeResources {
    pub reference_sequences: PathBuf,
    pub annotations: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct GenomeRequest<'a> {
    /// Canonical organism name, e.g. `Homo sapiens`.
    pub organism: &'a str,
    pub assembly: &'a str,
    /// Pinned Ensembl release; `None` follows the current release.
    pub version: Option<u32>,
    pub destination: &'a Path,
}

/// Makes the genome sequence and annotation of an assembly available locally.
/// Calling it again with the same request must not download anything.
pub trait GenomeResolver: Send + Sync {
    fn ensure(
        &self,
        request: &GenomeRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<GenomeResources, KiraError>;
}

/// `<dir>/<assembly>.fa` and `<dir>/<assembly>.annotation.gtf`
pub fn genome_paths(dir: &Path, assembly: &str) -> GenomeResources {
    GenomeResources {
        reference_sequences: dir.join(format!("{assembly}.fa")),
        annotations: dir.join(format!("{assembly}.annotation.gtf")),
    }
}

#[derive(Clone)]
pub struct EnsemblGenomeClient {
    client: Client,
    base_url: String,
}

impl EnsemblGenomeClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_url("https://ftp.ensembl.org/pub")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-seqprep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::GenomeHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::GenomeHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fasta_dir(&self, species: &str, version: Option<u32>) -> String {
        match version {
            Some(version) => format!("{}/release-{version}/fasta/{species}/dna/", self.base_url),
            None => format!("{}/current_fasta/{species}/dna/", self.base_url),
        }
    }

    fn gtf_dir(&self, species: &str, version: Option<u32>) -> String {
        match version {
            Some(version) => format!("{}/release-{version}/gtf/{species}/", self.base_url),
            None => format!("{}/current_gtf/{species}/", self.base_url),
        }
    }

    fn list_dir(&self, url: &str) -> Result<Vec<String>, KiraError> {
        let response = self.send_with_retries(url)?;
        let body = response
            .text()
            .map_err(|err| KiraError::GenomeHttp(err.to_string()))?;
        Ok(parse_listing(&body))
    }

    fn download_gz(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<(), KiraError> {
        let parent = dest
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        tracing::info!(url, dest = %dest.display(), "downloading genome resource");

        let response = self.send_with_retries(url)?;
        let mut decoder = MultiGzDecoder::new(response);
        let mut temp = tempfile::Builder::new()
            .prefix(".kira-seqprep-genome")
            .tempfile_in(parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut buffer = vec![0u8; COPY_CHUNK];
        loop {
            cancel.check("genome download")?;
            let read = decoder
                .read(&mut buffer)
                .map_err(|err| KiraError::GenomeHttp(format!("{url}: {err}")))?;
            if read == 0 {
                break;
            }
            temp.write_all(&buffer[..read])
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        temp.persist(dest)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, KiraError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    if !resp.status().is_success() {
                        return Err(KiraError::GenomeStatus {
                            status,
                            message: url.to_string(),
                        });
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::GenomeHttp(err.to_string()));
                }
            }
        }
    }
}

impl GenomeResolver for EnsemblGenomeClient {
    fn ensure(
        &self,
        request: &GenomeRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<GenomeResources, KiraError> {
        let paths = genome_paths(request.destination, request.assembly);
        if paths.reference_sequences.is_file() && paths.annotations.is_file() {
            tracing::debug!(assembly = request.assembly, "genome resources already present");
            return Ok(paths);
        }

        let species = sanitize_organism(request.organism);
        if !paths.reference_sequences.is_file() {
            let dir = self.fasta_dir(&species, request.version);
            let files = self.list_dir(&dir)?;
            let file = pick_fasta(&files).ok_or_else(|| {
                KiraError::GenomeHttp(format!("no genome FASTA for {species} at {dir}"))
            })?;
            self.download_gz(&format!("{dir}{file}"), &paths.reference_sequences, cancel)?;
        }
        if !paths.annotations.is_file() {
            let dir = self.gtf_dir(&species, request.version);
            let files = self.list_dir(&dir)?;
            let file = pick_gtf(&files).ok_or_else(|| {
                KiraError::GenomeHttp(format!("no GTF annotation for {species} at {dir}"))
            })?;
            self.download_gz(&format!("{dir}{file}"), &paths.annotations, cancel)?;
        }
        Ok(paths)
    }
}

/// File names linked from an HTML directory index.
pub fn parse_listing(body: &str) -> Vec<String> {
    HREF_PATTERN
        .captures_iter(body)
        .filter_map(|cap| cap.get(1).map(|value| value.as_str()))
        .filter(|value| !value.starts_with('.') && !value.ends_with('/'))
        .map(str::to_string)
        .collect()
}

/// Primary assembly if published, top level otherwise.
pub fn pick_fasta(files: &[String]) -> Option<&str> {
    [".dna.primary_assembly.fa.gz", ".dna.toplevel.fa.gz"]
        .iter()
        .find_map(|suffix| files.iter().find(|file| file.ends_with(suffix)))
        .map(String::as_str)
}

pub fn pick_gtf(files: &[String]) -> Option<&str> {
    files
        .iter()
        .find(|file| {
            file.ends_with(".gtf.gz")
                && !file.contains(".abinitio.")
                && !file.contains(".chr.")
                && !file.contains(".chr_patch")
        })
        .map(String::as_str)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
