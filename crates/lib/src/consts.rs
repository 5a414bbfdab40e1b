/// Application name used in directory and file names.
pub const APP_NAME: &str = "sketchforge";

/// Prefix of default build directories under the system temp dir.
pub const BUILD_DIR_PREFIX: &str = "arduino-sketch-";

/// Lock file guarding a build path against concurrent builds.
pub const LOCK_FILE_NAME: &str = ".sketchforge.lock";

/// Directory inside the build path holding cache entries.
pub const CACHE_DIR_NAME: &str = ".sketchforge-cache";

/// Bumped whenever the cache entry format or fingerprint inputs change.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Value published as `runtime.ide.version`.
pub const IDE_VERSION: &str = "10607";

/// Value published as `software`.
pub const SOFTWARE: &str = "ARDUINO";
