//! MCP Server implementation using rmcp

use crate::error::Error;
use crate::pdf::{FieldDiagnostic, FormField, FormFieldBridge};
use crate::source::{
    resolve_base64, resolve_cache, resolve_path, resolve_url, validate_path_access,
    CacheManager, CachedPdf, ResolvedPdf,
};
use anyhow::Result;
use base64::Engine;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Prefix of the suggested download name for a filled document
pub const FILLED_PREFIX: &str = "filled_";

/// PDF source specification
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
        /// Original file name, used to name the filled output
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// URL to download PDF from
    Url {
        /// URL of the PDF file
        url: String,
    },
    /// Reference to cached PDF
    CacheRef {
        /// Cache key from previous operation
        cache_key: String,
    },
}

const SOURCE_SHAPES: &str =
    "expected an object with one of \"path\", \"base64\", \"url\", or \"cache_key\"";

fn string_entry<E: serde::de::Error>(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> std::result::Result<Option<String>, E> {
    match obj.get(key) {
        None => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(E::custom(format!("\"{}\" must be a string", key))),
    }
}

impl<'de> serde::Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let Some(obj) = value.as_object() else {
            let got = match &value {
                serde_json::Value::Array(_) => "an array",
                serde_json::Value::String(_) => "a string",
                serde_json::Value::Number(_) => "a number",
                serde_json::Value::Bool(_) => "a boolean",
                serde_json::Value::Null => "null",
                serde_json::Value::Object(_) => "an object",
            };
            return Err(serde::de::Error::custom(format!(
                "Invalid source: {}, but got {}",
                SOURCE_SHAPES, got
            )));
        };

        if let Some(path) = string_entry(obj, "path")? {
            return Ok(PdfSource::Path { path });
        }
        if let Some(base64) = string_entry(obj, "base64")? {
            let name = string_entry(obj, "name")?;
            return Ok(PdfSource::Base64 { base64, name });
        }
        if let Some(url) = string_entry(obj, "url")? {
            return Ok(PdfSource::Url { url });
        }
        if let Some(cache_key) = string_entry(obj, "cache_key")? {
            return Ok(PdfSource::CacheRef { cache_key });
        }

        let keys: Vec<&String> = obj.keys().collect();
        Err(serde::de::Error::custom(format!(
            "Invalid source: {}, but got keys: {:?}",
            SOURCE_SHAPES, keys
        )))
    }
}

/// Security and resource configuration for the form server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories PDF paths (and output paths) must live in; empty allows any path
    pub resource_dirs: Vec<String>,
    /// Allow URLs that resolve to private/reserved IPs (default: false)
    pub allow_private_urls: bool,
    /// Maximum download size in bytes for URL sources (default: 100MB)
    pub max_download_bytes: u64,
    /// Maximum total bytes in cache (default: 512MB)
    pub cache_max_bytes: usize,
    /// Maximum number of cache entries (default: 100)
    pub cache_max_entries: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            allow_private_urls: false,
            max_download_bytes: 100 * 1024 * 1024, // 100MB
            cache_max_bytes: 512 * 1024 * 1024,    // 512MB
            cache_max_entries: 100,
        }
    }
}

/// MCP server exposing the form bridge
#[derive(Clone)]
pub struct FormServer {
    cache: Arc<RwLock<CacheManager>>,
    tool_router: ToolRouter<Self>,
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for extract_form_fields
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractFormFieldsParams {
    /// PDF sources to process
    pub sources: Vec<PdfSource>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Cache the source PDF and return its cache_key
    #[serde(default)]
    pub cache: bool,
    /// Report fields that were skipped or read with a default value
    #[serde(default)]
    pub include_diagnostics: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ExtractFormFieldsResult {
    pub source: String,
    /// Original file name of the document
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub page_count: u32,
    /// Whether the document has an interactive form at all
    pub has_form: bool,
    pub fields: Vec<FormField>,
    pub total_fields: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<FieldDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for fill_form
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FillFormParams {
    /// Source PDF containing form fields
    pub source: PdfSource,
    /// Field values to write, as returned by extract_form_fields (matched by name)
    pub fields: Vec<FormField>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Output file or directory. A directory receives `filled_<original-name>`.
    #[serde(default)]
    pub output_path: Option<String>,
    /// Return the flattened PDF as base64
    #[serde(default)]
    pub return_base64: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FillFormResult {
    /// Source identifier
    pub source: String,
    /// Suggested file name for the filled PDF
    pub download_name: String,
    /// Cache key for the output PDF, for chaining operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cache_key: Option<String>,
    /// Number of input fields written to the form
    pub fields_filled: u32,
    /// Inputs that were not applied, with the reason
    pub fields_skipped: Vec<FieldDiagnostic>,
    /// Number of pages in output PDF
    pub output_page_count: u32,
    /// Size of the output PDF in bytes
    pub output_size: usize,
    /// Path where PDF was saved (if output_path was specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Base64 encoded output PDF (if return_base64 was set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Suggested download name for a filled copy of `file_name`
pub fn filled_file_name(file_name: &str) -> String {
    format!("{}{}", FILLED_PREFIX, file_name)
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl FormServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new FormServer sandboxed to the given resource directories
    pub fn with_resource_dirs(dirs: Vec<String>) -> Self {
        Self::with_config(ServerConfig {
            resource_dirs: dirs,
            ..ServerConfig::default()
        })
    }

    /// Create a new FormServer with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let cache = CacheManager::new(config.cache_max_entries, config.cache_max_bytes);
        Self {
            cache: Arc::new(RwLock::new(cache)),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Extract form fields from PDF files
    #[tool(
        description = "Extract the AcroForm fields of PDF files as a flat list.

Each field has:
- id: positional key (field_0, field_1, ...)
- name: fully qualified field name (parent.child)
- type: text, checkbox, radio, button or signature
- label: display label derived from the name (\"firstName\" -> \"First Name\")
- value: string, or boolean for checkboxes
- options: for radio groups, \"Option 1\"..\"Option n\"

Choice fields (combo/list boxes) are not reported. Edit the values and pass the list to fill_form.

Source format: each element must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\", \"name\": \"form.pdf\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn extract_form_fields(
        &self,
        Parameters(params): Parameters<ExtractFormFieldsParams>,
    ) -> String {
        let mut results = Vec::new();

        for source in &params.sources {
            let result = self
                .process_extract_form_fields(source, &params)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "extract_form_fields failed");
                    ExtractFormFieldsResult {
                        source: Self::source_name(source),
                        file_name: String::new(),
                        cache_key: None,
                        page_count: 0,
                        has_form: false,
                        fields: vec![],
                        total_fields: 0,
                        diagnostics: vec![],
                        error: Some(e.client_message()),
                    }
                });
            results.push(result);
        }

        let response = serde_json::json!({ "results": results });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Fill form fields, flatten the form and produce a new PDF
    #[tool(
        description = "Fill form fields in a PDF, flatten the form and produce a new PDF.

fields: a list of {name, type, value} entries, usually the output of extract_form_fields with edited values.
- text: value is written as the field's text
- checkbox: checked when value is truthy (true or a non-empty string)
- radio: a truthy value selects a widget; \"Option k\" or the widget's export value picks which one

Fields are matched by name. Unknown names and type mismatches are reported in fields_skipped and never fail the call.

The flattened output is cached (output_cache_key). Set output_path to save it; a directory receives filled_<original-name>. Set return_base64 to receive the bytes inline.

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\", \"name\": \"form.pdf\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn fill_form(&self, Parameters(params): Parameters<FillFormParams>) -> String {
        let result = self.process_fill_form(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "fill_form failed");
            FillFormResult {
                source: Self::source_name(&params.source),
                download_name: String::new(),
                output_cache_key: None,
                fields_filled: 0,
                fields_skipped: vec![],
                output_page_count: 0,
                output_size: 0,
                output_path: None,
                output_base64: None,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }
}

impl FormServer {
    fn source_name(source: &PdfSource) -> String {
        match source {
            PdfSource::Path { path } => path.clone(),
            PdfSource::Base64 { .. } => "<base64>".to_string(),
            PdfSource::Url { url } => url.clone(),
            PdfSource::CacheRef { cache_key } => format!("<cache:{}>", cache_key),
        }
    }

    async fn resolve_source(&self, source: &PdfSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path } => {
                validate_path_access(path, &self.config.resource_dirs)?;
                resolve_path(path)
            }
            PdfSource::Base64 { base64, name } => resolve_base64(base64, name.as_deref()),
            PdfSource::Url { url } => {
                resolve_url(
                    url,
                    self.config.allow_private_urls,
                    self.config.max_download_bytes,
                )
                .await
            }
            PdfSource::CacheRef { cache_key } => resolve_cache(cache_key, &self.cache).await,
        }
    }

    /// Where `output_path` should be written: a directory gets `download_name` appended
    fn output_target(&self, output_path: &str, download_name: &str) -> crate::error::Result<PathBuf> {
        let requested = Path::new(output_path);
        let target = if requested.is_dir() || output_path.ends_with(['/', '\\']) {
            requested.join(download_name)
        } else {
            requested.to_path_buf()
        };
        self.validate_output_path_access(&target)
    }

    /// Validate that an output path is within allowed resource directories.
    /// Canonicalizes the parent directory since the output file may not exist yet.
    fn validate_output_path_access(&self, path: &Path) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(path.to_path_buf());
        }

        let denied = || Error::PathAccessDenied {
            path: path.display().to_string(),
        };
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let canonical_parent = std::fs::canonicalize(parent).map_err(|_| denied())?;
        let canonical_target = canonical_parent.join(path.file_name().ok_or_else(denied)?);

        let allowed = self.config.resource_dirs.iter().any(|dir| {
            std::fs::canonicalize(dir)
                .map(|cd| canonical_target.starts_with(cd))
                .unwrap_or(false)
        });
        if allowed {
            Ok(canonical_target)
        } else {
            Err(denied())
        }
    }

    /// Write output data to an already validated target; returns the path written
    fn write_output(target: Option<&Path>, data: &[u8]) -> crate::error::Result<Option<String>> {
        let Some(target) = target else {
            return Ok(None);
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(target, data)?;
        tracing::debug!(path = %target.display(), bytes = data.len(), "filled PDF written");
        Ok(Some(target.display().to_string()))
    }

    pub async fn process_extract_form_fields(
        &self,
        source: &PdfSource,
        params: &ExtractFormFieldsParams,
    ) -> crate::error::Result<ExtractFormFieldsResult> {
        let ResolvedPdf {
            data,
            source_name,
            file_name,
        } = self.resolve_source(source).await?;

        let cache_key = if params.cache {
            self.cache
                .write()
                .await
                .insert(CachedPdf::new(data.clone(), file_name.clone()))
        } else {
            None
        };

        let password = params.password.clone();
        let (fields, diagnostics, page_count, has_form) = tokio::task::spawn_blocking(move || {
            let mut bridge = FormFieldBridge::new();
            bridge.load_with_password(&data, password.as_deref())?;
            let (fields, diagnostics) = bridge.extract_fields_with_diagnostics();
            let summary = (fields, diagnostics, bridge.page_count(), bridge.has_form());
            bridge.cleanup();
            Ok::<_, Error>(summary)
        })
        .await
        .map_err(|e| Error::TaskJoin {
            reason: e.to_string(),
        })??;

        Ok(ExtractFormFieldsResult {
            source: source_name,
            file_name,
            cache_key,
            page_count,
            has_form,
            total_fields: fields.len(),
            fields,
            diagnostics: if params.include_diagnostics {
                diagnostics
            } else {
                Vec::new()
            },
            error: None,
        })
    }

    pub async fn process_fill_form(
        &self,
        params: &FillFormParams,
    ) -> crate::error::Result<FillFormResult> {
        let ResolvedPdf {
            data,
            source_name,
            file_name,
        } = self.resolve_source(&params.source).await?;

        let download_name = filled_file_name(&file_name);
        let target = params
            .output_path
            .as_deref()
            .map(|path| self.output_target(path, &download_name))
            .transpose()?;

        let fields = params.fields.clone();
        let password = params.password.clone();
        let (output, skipped, output_page_count) = tokio::task::spawn_blocking(move || {
            let mut bridge = FormFieldBridge::new();
            bridge.load_with_password(&data, password.as_deref())?;
            let skipped = bridge.fill_fields_with_diagnostics(&fields)?;
            let output = bridge.generate_output()?;
            let page_count = bridge.page_count();
            bridge.cleanup();
            Ok::<_, Error>((output, skipped, page_count))
        })
        .await
        .map_err(|e| Error::TaskJoin {
            reason: e.to_string(),
        })??;

        // Cached under the original name so a chained fill is named the same way
        let output_cache_key = self
            .cache
            .write()
            .await
            .insert(CachedPdf::new(output.clone(), file_name.clone()));
        if output_cache_key.is_none() {
            tracing::warn!(bytes = output.len(), "filled PDF exceeds cache budget, not cached");
        }

        let output_path = Self::write_output(target.as_deref(), &output)?;
        let output_base64 = params
            .return_base64
            .then(|| base64::engine::general_purpose::STANDARD.encode(&output));

        Ok(FillFormResult {
            source: source_name,
            download_name,
            output_cache_key,
            fields_filled: params.fields.len().saturating_sub(skipped.len()) as u32,
            fields_skipped: skipped,
            output_page_count,
            output_size: output.len(),
            output_path,
            output_base64,
            error: None,
        })
    }
}

impl Default for FormServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for FormServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF form bridge: extract_form_fields lists a PDF's AcroForm fields as a flat \
                 list; fill_form writes edited values back, flattens the form and returns the \
                 filled PDF (cached, optionally saved or returned as base64)."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server without resource directories
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with specified resource directories
pub async fn run_server_with_dirs(resource_dirs: Vec<String>) -> Result<()> {
    run_server_with_config(ServerConfig {
        resource_dirs,
        ..ServerConfig::default()
    })
    .await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    tracing::info!(
        resource_dirs = ?config.resource_dirs,
        allow_private_urls = config.allow_private_urls,
        "PDF form bridge ready, waiting for connections..."
    );
    let server = FormServer::with_config(config);

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
