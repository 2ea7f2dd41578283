//! Configuration decoding.

use serde_yaml::Mapping;
use thiserror::Error;

use crate::config::declaration::Declarations;

/// Error type for configuration decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Decode configuration bytes into the ordered declaration sequence.
///
/// The document must be a sequence of mappings. An empty document yields no
/// declarations; anything malformed fails as a whole.
pub fn decode(bytes: &[u8]) -> Result<Declarations, DecodeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Declarations::default());
    }
    let items: Vec<Mapping> = serde_yaml::from_slice(bytes)?;
    tracing::debug!(bytes = bytes.len(), declarations = items.len(), "Configuration decoded");
    Ok(Declarations::new(items))
}
