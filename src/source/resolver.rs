//! Source resolution for PDF data

use crate::error::{Error, Result};
use crate::source::CacheManager;
use base64::Engine;
use futures_util::StreamExt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// File name used when a source carries none
pub const DEFAULT_FILE_NAME: &str = "document.pdf";

/// Resolved PDF data
#[derive(Debug)]
pub struct ResolvedPdf {
    pub data: Vec<u8>,
    /// Display identifier of the source (path, URL, `<base64>`, `<cache:key>`)
    pub source_name: String,
    /// Original file name, used to name the filled output
    pub file_name: String,
}

/// Reduce a user-supplied name to a bare file name.
///
/// Directory components and control characters are dropped; an empty result
/// falls back to [`DEFAULT_FILE_NAME`].
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        DEFAULT_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

fn check_pdf_header(data: &[u8], what: &str) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: format!("{} is not a valid PDF file", what),
        });
    }
    Ok(())
}

/// Allow `path` only inside one of `allowed_dirs`; no dirs means no sandbox
pub fn validate_path_access(path: &str, allowed_dirs: &[String]) -> Result<PathBuf> {
    if allowed_dirs.is_empty() {
        return Ok(PathBuf::from(path));
    }

    let canonical = std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
        path: path.to_string(),
    })?;
    let allowed = allowed_dirs.iter().any(|dir| {
        std::fs::canonicalize(dir)
            .map(|cd| canonical.starts_with(cd))
            .unwrap_or(false)
    });
    if allowed {
        Ok(canonical)
    } else {
        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }
}

/// Resolve a file path to PDF data
pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedPdf> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(Error::PdfNotFound {
            path: path.display().to_string(),
        });
    }

    let data = std::fs::read(path).map_err(Error::Io)?;
    check_pdf_header(&data, "File")?;

    let file_name = path
        .file_name()
        .map(|n| sanitize_file_name(&n.to_string_lossy()))
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
    Ok(ResolvedPdf {
        data,
        source_name: path.display().to_string(),
        file_name,
    })
}

/// Resolve base64 encoded data to PDF data, optionally named by the caller
pub fn resolve_base64(base64_data: &str, name: Option<&str>) -> Result<ResolvedPdf> {
    let engine = base64::engine::general_purpose::STANDARD;
    let data = engine.decode(base64_data.trim())?;
    check_pdf_header(&data, "Decoded data")?;

    Ok(ResolvedPdf {
        data,
        source_name: "<base64>".to_string(),
        file_name: name
            .map(sanitize_file_name)
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
    })
}

/// Check if an IP address is private/reserved (loopback, link-local, private ranges, etc.)
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254/16, cloud metadata
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // CGNAT 100.64/10
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFE00) == 0xFC00 // fc00::/7
                || (first & 0xFFC0) == 0xFE80 // fe80::/10
        }
    }
}

/// Check URL for SSRF by resolving DNS and verifying IPs are public
async fn check_ssrf(url: &url::Url) -> Result<()> {
    let host = url.host_str().ok_or_else(|| Error::SourceResolution {
        reason: "URL has no host".to_string(),
    })?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::SourceResolution {
            reason: format!("DNS resolution failed for {}: {}", host, e),
        })?;

    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(Error::SsrfBlocked {
                url: url.to_string(),
            });
        }
    }
    Ok(())
}

/// Last non-empty path segment of a URL, e.g. `w9.pdf` for `https://x/forms/w9.pdf?v=2`
fn url_file_name(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(sanitize_file_name)
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}

/// Resolve a URL to PDF data with SSRF protection and download size limits
pub async fn resolve_url(
    url: &str,
    allow_private_urls: bool,
    max_download_bytes: u64,
) -> Result<ResolvedPdf> {
    let parsed = url::Url::parse(url).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid URL: {}", e),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::SourceResolution {
            reason: format!("Unsupported URL scheme: {}", parsed.scheme()),
        });
    }
    if !allow_private_urls {
        check_ssrf(&parsed).await?;
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(Error::HttpRequest)?;
    let response = client.get(parsed.clone()).send().await?;

    if !response.status().is_success() {
        return Err(Error::SourceResolution {
            reason: format!("HTTP request failed with status: {}", response.status()),
        });
    }
    if let Some(content_length) = response.content_length() {
        if content_length > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size: content_length,
                max_size: max_download_bytes,
            });
        }
    }

    // Content-Length can lie; enforce the limit while streaming
    let mut data = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Error::HttpRequest)?;
        data.extend_from_slice(&chunk);
        if data.len() as u64 > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size: data.len() as u64,
                max_size: max_download_bytes,
            });
        }
    }
    check_pdf_header(&data, "Downloaded data")?;

    Ok(ResolvedPdf {
        data,
        source_name: url.to_string(),
        file_name: url_file_name(&parsed),
    })
}

/// Resolve a cache key to PDF data
pub async fn resolve_cache(
    cache_key: &str,
    cache: &Arc<RwLock<CacheManager>>,
) -> Result<ResolvedPdf> {
    let entry = cache
        .read()
        .await
        .get(cache_key)
        .ok_or_else(|| Error::CacheKeyNotFound {
            key: cache_key.to_string(),
        })?;

    Ok(ResolvedPdf {
        data: entry.data,
        source_name: format!("<cache:{}>", cache_key),
        file_name: entry.file_name,
    })
}
