//! Report archive (object store) boundary.
//!
//! After reconciliation every processed entity is handed to a
//! [`ReportArchive`], which copies its resolved report documents into
//! durable storage. [`FsArchive`] lays objects out as
//! `<root>/<symbol>/<security>/<year>.pdf`, one directory per ledger
//! identity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use csrledger_shared::{ArchiveConfig, EntityId, EntityRecord, LedgerError, Result};
use reqwest::Client;
use tracing::{debug, info, warn};

/// User-Agent string for archive downloads.
const USER_AGENT: &str = concat!("csrledger/", env!("CARGO_PKG_VERSION"));

/// Summary of one entity upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Documents newly stored.
    pub stored: usize,
    /// Documents already present in the archive.
    pub skipped: usize,
    /// Years whose download or write failed, with the reason.
    pub failed: Vec<(i32, String)>,
}

impl UploadReceipt {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Durable storage for report documents.
#[async_trait]
pub trait ReportArchive: Send + Sync {
    /// Store every resolved document of `record`.
    ///
    /// Per-document failures are reported in the receipt; `Err` means the
    /// archive itself could not be used for this entity.
    async fn upload(&self, record: &EntityRecord) -> Result<UploadReceipt>;
}

/// Directory-backed archive.
pub struct FsArchive {
    root: PathBuf,
    client: Client,
}

impl FsArchive {
    /// Create (or validate) the archive root. Failure means the object
    /// store backend is unreachable.
    pub fn connect(config: &ArchiveConfig) -> Result<Self> {
        let root = PathBuf::from(&config.root);
        std::fs::create_dir_all(&root)
            .map_err(|e| LedgerError::connection("archive", format!("{}: {e}", root.display())))?;

        let probe = root.join(".csrledger-probe");
        std::fs::write(&probe, b"ok")
            .map_err(|e| LedgerError::connection("archive", format!("{} not writable: {e}", root.display())))?;
        let _ = std::fs::remove_file(&probe);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { root, client })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Object path for one entity-year.
    pub fn object_path(&self, id: &EntityId, year: i32) -> PathBuf {
        self.object_dir(id).join(format!("{year}.pdf"))
    }

    /// Directory holding every document of one entity.
    fn object_dir(&self, id: &EntityId) -> PathBuf {
        self.root
            .join(path_segment(&id.symbol))
            .join(path_segment(&id.security))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LedgerError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Network(format!("{url}: body read failed: {e}")))?;

        let tmp = dest.with_extension("pdf.part");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| LedgerError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| LedgerError::io(dest, e))?;
        Ok(())
    }
}

#[async_trait]
impl ReportArchive for FsArchive {
    async fn upload(&self, record: &EntityRecord) -> Result<UploadReceipt> {
        let dir = self.object_dir(&record.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| LedgerError::io(&dir, e))?;

        let mut receipt = UploadReceipt::default();
        for (year, url) in record.report_years.resolved() {
            let dest = self.object_path(&record.id, year);
            if dest.exists() {
                debug!(entity = %record.id, year, "document already archived");
                receipt.skipped += 1;
                continue;
            }

            match self.download(url, &dest).await {
                Ok(()) => receipt.stored += 1,
                Err(e) => {
                    warn!(entity = %record.id, year, error = %e, "archive download failed");
                    receipt.failed.push((year, e.to_string()));
                }
            }
        }

        info!(
            entity = %record.id,
            stored = receipt.stored,
            skipped = receipt.skipped,
            failed = receipt.failed.len(),
            "archive upload finished"
        );
        Ok(receipt)
    }
}

/// Filesystem-safe path segment for one identity field.
///
/// ASCII letters, digits and `-` pass through; every other byte becomes
/// `_XX` (hex), so distinct inputs never share a segment.
fn path_segment(value: &str) -> String {
    if value.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("_{byte:02X}"));
        }
    }
    out
}
