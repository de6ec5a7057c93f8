//! Source resolution and caching

pub mod cache;
pub mod resolver;

pub use cache::{CacheManager, CachedPdf};
pub use resolver::{
    resolve_base64, resolve_cache, resolve_path, resolve_url, sanitize_file_name,
    validate_path_access, ResolvedPdf, DEFAULT_FILE_NAME,
};
