//! File-based loading.

use std::path::Path;

use super::codec::Codec;
use super::properties::Properties;
use super::ConfigError;

/// Loads a file into a new [`Properties`] using `reader` to decode it and
/// `loader` for typed lookups.
///
/// The file must exist.
pub fn load_file(
    path: impl AsRef<Path>,
    reader: impl Codec + 'static,
    loader: impl Codec + 'static,
) -> Result<Properties, ConfigError> {
    Properties::builder()
        .with_reader(reader)
        .with_loader(loader)
        .with_file(path, true)
        .build()
}

/// Reads a config file.
///
/// Returns `Ok(None)` if the file doesn't exist and `required` is false.
pub(crate) fn read_config_file(path: &Path, required: bool) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if required {
                Err(ConfigError::FileNotFound(path.to_path_buf()))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(ConfigError::Io(e)),
    }
}
