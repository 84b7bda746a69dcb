/// imagegate log prefix: Picture + Gate + Lock
/// Represents: guarded image gateway
pub const EMOJI_PREFIX: &str = "🖼️🚪🔒";

/// Application name
pub const APP_NAME: &str = "imagegate";

/// Application version, advertised in the `Server` header and on `/`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Paths reachable via GET without authorization (relative to the path prefix)
pub const PUBLIC_PATHS: &[&str] = &["/", "/health", "/form"];

/// Multipart field carrying the uploaded file
pub const FORM_FIELD_NAME: &str = "file";

/// Destination folder for derived images when `dest` is absent
pub const DEFAULT_IMAGE_DEST: &str = "images";

/// Destination folder for videos when `dest` is absent
pub const DEFAULT_VIDEO_DEST: &str = "videos";

/// Query parameters that never influence the derived filename
pub const NAMING_EXCLUDED_PARAMS: &[&str] = &["type", "quality", "sign", "jwt"];

/// Length of the parameter hash fragment spliced into derived filenames
pub const NAME_HASH_LEN: usize = 6;

/// Length of the random suffix given to uploaded videos
pub const VIDEO_SUFFIX_LEN: usize = 6;

/// Minimum length of the URL signature key
pub const MIN_URL_SIGNATURE_KEY_LEN: usize = 32;

/// Longest accepted HTTP cache TTL, ten years in seconds
pub const MAX_HTTP_CACHE_TTL: i64 = 10 * 365 * 24 * 60 * 60;

/// Maximum number of steps accepted by the `pipeline` operation
pub const MAX_PIPELINE_STEPS: usize = 10;

/// Header carrying the static API key
pub const API_KEY_HEADER: &str = "API-Key";

/// Query parameter alternatives for credentials
pub const API_KEY_PARAM: &str = "key";
pub const JWT_PARAM: &str = "jwt";
pub const SIGNATURE_PARAM: &str = "sign";
