//! Utilities shared by the Runboard engine and CLI.

pub mod path_processing;
pub mod view_state_cache;

pub use path_processing::{expand_tilde, file_stem_for};
pub use view_state_cache::{
    CacheEntry, CacheRecord, DEFAULT_CACHE_VERSION, DEFAULT_MAX_AGE, VIEW_STATE_DIR_ENV, ViewStateCache, ViewStateCacheError,
    ViewStateCacheOptions, ViewStateCacheRegistry, default_view_state_dir,
};
