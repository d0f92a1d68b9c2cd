//! Remote artifact download.

use crate::checksum::strip_prefix;
use crate::{BundleError, BundleResult, CancelToken};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

const CHUNK_SIZE: usize = 256 * 1024;

/// Downloads remote archives over HTTP(S).
///
/// The HTTP client is built per download so that a registry which never
/// touches the network never initialises TLS.
#[derive(Debug, Clone)]
pub struct Fetcher {
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// When `expected_sha256` is given the download is verified before
    /// returning; a mismatch is an [`BundleError::Integrity`] error.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
        cancel: &CancelToken,
    ) -> BundleResult<u64> {
        cancel.check()?;
        tracing::info!(url, "downloading");

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(self.timeout)
            .build()?;
        let mut response = client.get(url).send()?.error_for_status()?;

        let mut out = BufWriter::new(File::create(dest)?);
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            cancel.check()?;
            let read = response.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
            out.write_all(&buf[..read])?;
            total += read as u64;
        }
        out.flush()?;

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = expected_sha256
            && !strip_prefix(expected).eq_ignore_ascii_case(&actual)
        {
            return Err(BundleError::Integrity {
                path: url.to_string(),
                expected: expected.to_string(),
                actual: format!("sha256:{actual}"),
            });
        }

        tracing::debug!(url, bytes = total, sha256 = %actual, "download complete");
        Ok(total)
    }
}
