// Catalog resolver: turns a user token (1-based index or literal name)
// into the name of a file present in the fetched listing.

use crate::api::RemoteFile;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Book '{0}' not found.")]
    NotFound(String),
    #[error("Invalid index {index}. {}", range_hint(.len))]
    OutOfRange { index: String, len: usize },
}

fn range_hint(len: &usize) -> String {
    if *len == 0 {
        "The catalog is empty.".to_string()
    } else {
        format!("Use a number between 1 and {}.", len)
    }
}

/// Resolve `token` against `catalog`.
///
/// A token made only of ASCII digits is a 1-based index; anything else must
/// match an entry's name exactly (first match wins on duplicates).
pub fn resolve<'a>(token: &str, catalog: &'a [RemoteFile]) -> Result<&'a str, ResolveError> {
    let token = token.trim();
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        let out_of_range = || ResolveError::OutOfRange {
            index: token.to_string(),
            len: catalog.len(),
        };
        // Anything too large for usize is out of range as well.
        let idx: usize = token.parse().map_err(|_| out_of_range())?;
        if idx == 0 || idx > catalog.len() {
            return Err(out_of_range());
        }
        return Ok(&catalog[idx - 1].name);
    }

    catalog
        .iter()
        .find(|f| f.name == token)
        .map(|f| f.name.as_str())
        .ok_or_else(|| ResolveError::NotFound(token.to_string()))
}
