//! Certificate artifact rendering and storage
//!
//! Runs out of band after issuance. A failed job never touches the issued
//! record beyond leaving `artifact_location` unset, and
//! [`ArtifactPipeline::retry_missing`] picks such records up again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::domain::{hash_to_hex, CertificateDetail, CertificateRecord, ProviderId, VendorType};
use crate::infra::{CertificateStore, RegistryError};
use crate::metrics::{metric_names, MetricsRegistry};

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("render failed: {0}")]
    Render(String),

    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("artifact storage failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Everything printed on a certificate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateTemplate {
    pub certificate_number: String,
    pub certificate_hash: String,
    pub provider_id: ProviderId,
    pub full_name: String,
    pub city: String,
    pub vendor_type: VendorType,
    pub service_type: String,
    pub detail_label: &'static str,
    pub detail_value: Option<String>,
    pub issued_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub verification_score: u8,
    pub issuing_authority: String,
    pub qr_payload: String,
}

impl CertificateTemplate {
    pub fn from_record(record: &CertificateRecord, issuing_authority: &str) -> Self {
        let snapshot = &record.snapshot;
        let (detail_label, detail_value) = match &snapshot.detail {
            CertificateDetail::PhotoRef(photo) => ("Photograph", photo.clone()),
            CertificateDetail::LicenseNumber(number) => ("License Number", Some(number.clone())),
            CertificateDetail::RegistrationNumber(number) => {
                let label = match snapshot.vendor_type {
                    VendorType::Accommodation | VendorType::FoodRestaurant => "GST Number",
                    _ => "Registration Number",
                };
                (label, Some(number.clone()))
            }
        };

        Self {
            certificate_number: record.certificate_number.to_string(),
            certificate_hash: hash_to_hex(&record.certificate_hash),
            provider_id: record.provider_id,
            full_name: snapshot.full_name.clone(),
            city: snapshot.city.clone(),
            vendor_type: snapshot.vendor_type,
            service_type: snapshot.service_type.clone(),
            detail_label,
            detail_value,
            issued_date: record.issued_date,
            expiry_date: record.expiry_date,
            verification_score: record.verification_score,
            issuing_authority: issuing_authority.to_string(),
            qr_payload: record.qr_payload.clone(),
        }
    }
}

/// Turns a template into a document
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn extension(&self) -> &'static str;

    async fn render(&self, template: &CertificateTemplate) -> Result<Vec<u8>, ArtifactError>;
}

/// Stores rendered documents and returns where they landed
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, name: &str, content_type: &str, bytes: &[u8])
        -> Result<String, ArtifactError>;
}

/// Self-contained printable HTML certificate
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlTemplateRenderer;

#[async_trait]
impl ArtifactRenderer for HtmlTemplateRenderer {
    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }

    fn extension(&self) -> &'static str {
        "html"
    }

    async fn render(&self, t: &CertificateTemplate) -> Result<Vec<u8>, ArtifactError> {
        let detail = match &t.detail_value {
            Some(value) if !value.is_empty() => escape_html(value),
            _ => "-".to_string(),
        };

        let html = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Certificate {number}</title>
</head>
<body>
<main class="certificate">
<h1>{authority}</h1>
<h2>Certificate of Registration</h2>
<p class="number">{number}</p>
<dl>
<dt>Name</dt><dd>{name}</dd>
<dt>Service</dt><dd>{service}</dd>
<dt>City</dt><dd>{city}</dd>
<dt>{detail_label}</dt><dd>{detail}</dd>
<dt>Verification Score</dt><dd>{score}/100</dd>
<dt>Issued</dt><dd>{issued}</dd>
<dt>Valid Until</dt><dd>{expiry}</dd>
</dl>
<p class="verify">Verify at <a href="{qr}">{qr}</a></p>
<p class="hash">{hash}</p>
</main>
</body>
</html>
"#,
            number = escape_html(&t.certificate_number),
            authority = escape_html(&t.issuing_authority),
            name = escape_html(&t.full_name),
            service = escape_html(&t.service_type),
            city = escape_html(&t.city),
            detail_label = t.detail_label,
            detail = detail,
            score = t.verification_score,
            issued = t.issued_date.format("%d %B %Y"),
            expiry = t.expiry_date.format("%d %B %Y"),
            qr = escape_html(&t.qr_payload),
            hash = escape_html(&t.certificate_hash),
        );

        Ok(html.into_bytes())
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Artifact store on the local filesystem
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `ARTIFACT_DIR`, default `./artifacts`
    pub fn from_env() -> Self {
        Self::new(std::env::var("ARTIFACT_DIR").unwrap_or_else(|_| "./artifacts".to_string()))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        name: &str,
        _content_type: &str,
        bytes: &[u8],
    ) -> Result<String, ArtifactError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(name);
        let staging = self.root.join(format!(".{name}.tmp"));

        // Rename keeps readers from ever seeing a half-written file.
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        Ok(path.to_string_lossy().into_owned())
    }
}

/// Render-and-store job for issued certificates
#[derive(Clone)]
pub struct ArtifactPipeline {
    certificates: Arc<dyn CertificateStore>,
    renderer: Arc<dyn ArtifactRenderer>,
    store: Arc<dyn ArtifactStore>,
    issuing_authority: Arc<str>,
    metrics: Arc<MetricsRegistry>,
}

impl ArtifactPipeline {
    pub fn new(
        certificates: Arc<dyn CertificateStore>,
        renderer: Arc<dyn ArtifactRenderer>,
        store: Arc<dyn ArtifactStore>,
        issuing_authority: String,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            certificates,
            renderer,
            store,
            issuing_authority: issuing_authority.into(),
            metrics,
        }
    }

    /// Run the job in the background.
    pub fn enqueue(&self, record: CertificateRecord) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            // Failures are logged inside process; the record stays without an artifact.
            let _ = this.process(&record).await;
        })
    }

    /// Render, store and record the location of one certificate's artifact.
    #[tracing::instrument(
        skip(self, record),
        fields(certificate_number = %record.certificate_number)
    )]
    pub async fn process(&self, record: &CertificateRecord) -> Result<String, ArtifactError> {
        match self.render_and_store(record).await {
            Ok(location) => {
                self.metrics.inc_counter(metric_names::ARTIFACTS_STORED).await;
                tracing::info!(location = %location, "Certificate artifact stored");
                Ok(location)
            }
            Err(err) => {
                self.metrics.inc_counter(metric_names::ARTIFACTS_FAILED).await;
                tracing::warn!(error = %err, "Certificate artifact job failed");
                Err(err)
            }
        }
    }

    async fn render_and_store(&self, record: &CertificateRecord) -> Result<String, ArtifactError> {
        let template = CertificateTemplate::from_record(record, &self.issuing_authority);
        let bytes = self.renderer.render(&template).await?;

        let name = format!("{}.{}", record.certificate_number, self.renderer.extension());
        let location = self
            .store
            .put(&name, self.renderer.content_type(), &bytes)
            .await?;

        self.certificates
            .set_artifact_location(&record.certificate_hash, &location)
            .await?;
        Ok(location)
    }

    /// Re-run the job for up to `limit` certificates without an artifact.
    ///
    /// Returns how many artifacts were stored.
    pub async fn retry_missing(&self, limit: usize) -> Result<usize, RegistryError> {
        let pending = self.certificates.list_missing_artifacts(limit).await?;
        let mut stored = 0;
        for record in &pending {
            if self.process(record).await.is_ok() {
                stored += 1;
            }
        }
        if !pending.is_empty() {
            tracing::info!(
                attempted = pending.len(),
                stored,
                "Retried missing certificate artifacts"
            );
        }
        Ok(stored)
    }
}
