// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers keeps configuration defaults
// and the routing pipeline in agreement.

// =============================================================================
// Server defaults
// =============================================================================

/// Default listen address
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 4;

/// Default origin connect/read/write timeout in seconds
pub const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;

/// Prefix reserved for the proxy's own endpoints
pub const ADMIN_PREFIX: &str = "/_edge";

// =============================================================================
// Routing defaults
// =============================================================================

/// Route prefix owned by the documentation browser
pub const DEFAULT_DOCS_PREFIX: &str = "/docs";

/// Framework-internal prefixes that never receive a locale rewrite
pub const DEFAULT_INTERNAL_PREFIXES: &[&str] = &["/_next", "/api"];

/// Query parameter that starts a CMS preview session
pub const DEFAULT_PREVIEW_KEY_PARAM: &str = "previewKey";

/// Query parameter that ends a CMS preview session
pub const DEFAULT_PREVIEW_EXIT_PARAM: &str = "exitPreview";

/// Internal endpoint that initiates preview mode
pub const DEFAULT_PREVIEW_ENDPOINT: &str = "/api/preview";

/// Internal endpoint that exits preview mode
pub const DEFAULT_PREVIEW_EXIT_ENDPOINT: &str = "/api/exit-preview";

/// Query parameter carrying a CMS content ID
pub const DEFAULT_CONTENT_ID_PARAM: &str = "pageId";

/// Internal endpoint resolving a content ID to a page
pub const DEFAULT_CONTENT_ENDPOINT: &str = "/api/resolve-page";

/// Legacy locale query parameter
pub const DEFAULT_LANG_PARAM: &str = "lang";

/// Query parameters allowed through the rewrite boundary
pub const DEFAULT_SMUGGLED_PARAMS: &[&str] = &["audience", "region", "q"];

/// Maximum encoded length of the smuggled parameter blob
pub const DEFAULT_SMUGGLED_MAX_LENGTH: usize = 512;

/// Marker wrapping the smuggled parameter path segment
pub const SMUGGLE_MARKER: &str = "~~~";

/// Cache lifetime of redirects to relative destinations (10 minutes)
pub const DEFAULT_RELATIVE_REDIRECT_TTL_SECS: u64 = 600;

/// Cache lifetime of redirects to absolute destinations (1 hour)
pub const DEFAULT_ABSOLUTE_REDIRECT_TTL_SECS: u64 = 3600;

/// Status used for preview and locale-migration redirects
pub const TEMPORARY_REDIRECT_STATUS: u16 = 307;

// =============================================================================
// Redirect table defaults
// =============================================================================

/// Directory holding the persisted redirect artifacts
pub const DEFAULT_DATA_DIR: &str = "data";

/// File name of the persisted redirect table snapshot
pub const DEFAULT_SNAPSHOT_FILE: &str = "redirects.json";

/// File name of the persisted bloom filter artifact
pub const DEFAULT_FILTER_FILE: &str = "redirects.bloom.json";

/// Target false positive rate of the redirect bloom filter
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 1e-4;

/// Status used when a CMS rule carries no usable redirect status
pub const DEFAULT_REDIRECT_STATUS: u16 = 301;

/// CMS request timeout in seconds
pub const DEFAULT_CMS_TIMEOUT_SECS: u64 = 20;

/// Path of the CMS redirect listing, relative to the CMS base URL
pub const DEFAULT_CMS_REDIRECTS_PATH: &str = "/redirects";

/// Header carrying the CMS API key
pub const DEFAULT_CMS_API_KEY_HEADER: &str = "api-key";

// =============================================================================
// Bloom filter growth
// =============================================================================

/// Capacity multiplier applied to each new filter layer
pub const BLOOM_GROWTH_FACTOR: usize = 2;

/// Error rate multiplier applied to each new filter layer
pub const BLOOM_TIGHTENING_RATIO: f64 = 0.5;

/// Version tag written into serialized filter artifacts
pub const BLOOM_ARTIFACT_VERSION: u32 = 1;
