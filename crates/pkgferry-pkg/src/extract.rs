//! Metadata extraction: detect the container, parse it, and fall back to the
//! fixed-offset title id when structured parsing fails.

use bytes::Bytes;
use pkgferry_common::{ByteSource, Error, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detect::{detect_format, PackageFormat};
use crate::orbis::OrbisParser;
use crate::prospero::{read_base_pointer, ProsperoParser};
use crate::reader::read_exact_at;
use crate::store::TempFileStore;

/// Offset of the title id token inside the content id, relative to the
/// container (Orbis) or the inner base (Prospero).
const FALLBACK_TOKEN_OFFSET: u64 = 0x47;
const FALLBACK_TOKEN_LEN: u64 = 9;

/// How the metadata was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    /// Decoded from the embedded parameter blob.
    Structured,
    /// Structured parsing failed; title and title id are the raw id token.
    Fallback,
}

/// Identifying metadata of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMetadata {
    pub format: PackageFormat,
    pub title: String,
    pub title_id: String,
    /// Where the icon was stored, if the package had one.
    pub icon_ref: Option<String>,
    pub source: MetadataSource,
}

impl PackageMetadata {
    pub fn is_fallback(&self) -> bool {
        self.source == MetadataSource::Fallback
    }
}

struct Parsed {
    title: String,
    title_id: String,
    icon: Option<Bytes>,
}

/// Extract title, title id and icon from a package.
///
/// An unrecognized magic is fatal. Any other structured-parse failure falls
/// back to the 9-byte id token at `0x47`; only when that also fails is the
/// structured error returned.
pub async fn extract_metadata(
    source: &dyn ByteSource,
    store: &dyn TempFileStore,
) -> Result<PackageMetadata> {
    let format = detect_format(source).await?;
    debug!(%format, size = source.size(), "Detected package format");

    let parsed = match format {
        PackageFormat::Orbis => parse_orbis(source).await,
        PackageFormat::Prospero => parse_prospero(source).await,
    };

    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(structured) => match read_fallback_token(source, format).await {
            Ok(token) => {
                warn!(
                    fallback = true,
                    %format,
                    title_id = %token,
                    error = %structured,
                    "Structured metadata unavailable, using fixed-offset title id"
                );
                return Ok(PackageMetadata {
                    format,
                    title: token.clone(),
                    title_id: token,
                    icon_ref: None,
                    source: MetadataSource::Fallback,
                });
            }
            Err(fallback) => {
                warn!(
                    fallback = true,
                    %format,
                    error = %fallback,
                    "Fixed-offset title id unavailable"
                );
                return Err(structured);
            }
        },
    };

    let icon_ref = match parsed.icon {
        Some(icon) => match store.store(icon).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(error = %e, "Failed to store package icon, continuing without it");
                None
            }
        },
        None => None,
    };

    info!(
        %format,
        title = %parsed.title,
        title_id = %parsed.title_id,
        icon = icon_ref.is_some(),
        "Extracted package metadata"
    );

    Ok(PackageMetadata {
        format,
        title: parsed.title,
        title_id: parsed.title_id,
        icon_ref,
        source: MetadataSource::Structured,
    })
}

async fn parse_orbis(source: &dyn ByteSource) -> Result<Parsed> {
    let package = OrbisParser::new(source).parse_package().await?;
    let title = package
        .title()
        .ok_or_else(|| Error::format("PARAM.SFO has no TITLE"))?
        .to_string();
    let title_id = package
        .title_id()
        .ok_or_else(|| Error::format("PARAM.SFO has no TITLE_ID"))?
        .to_string();

    Ok(Parsed {
        title,
        title_id,
        icon: package.icon,
    })
}

async fn parse_prospero(source: &dyn ByteSource) -> Result<Parsed> {
    let package = ProsperoParser::new(source).parse_package().await?;
    Ok(Parsed {
        title: package.title,
        title_id: package.title_id,
        icon: package.icon,
    })
}

async fn read_fallback_token(source: &dyn ByteSource, format: PackageFormat) -> Result<String> {
    let base = match format {
        PackageFormat::Orbis => 0,
        PackageFormat::Prospero => read_base_pointer(source).await?,
    };
    let raw = read_exact_at(
        source,
        base + FALLBACK_TOKEN_OFFSET,
        FALLBACK_TOKEN_LEN,
        "fallback title id",
    )
    .await?;

    let token = String::from_utf8_lossy(&raw);
    let token = token.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    if token.is_empty() {
        return Err(Error::format("fallback title id is empty"));
    }
    Ok(token.to_string())
}
