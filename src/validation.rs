/**
 * Input validation and sanitization
 * Ensures data integrity across chunking, indexing and retrieval calls
 */

use crate::error::{DircError, DircResult};

/// Validate that a string is not empty
pub fn validate_not_empty(value: &str, field_name: &str) -> DircResult<()> {
    if value.trim().is_empty() {
        return Err(DircError::InputError(format!(
            "{} cannot be empty",
            field_name
        )));
    }
    Ok(())
}

/// Validate string length
pub fn validate_length(value: &str, field_name: &str, min: usize, max: usize) -> DircResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(DircError::InputError(format!(
            "{} must be between {} and {} characters (got {})",
            field_name, min, max, len
        )));
    }
    Ok(())
}

/// Validate a document_id: non-empty, no path separators or control characters.
pub fn validate_document_id(document_id: &str) -> DircResult<()> {
    validate_not_empty(document_id, "document_id")?;
    if document_id
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\')
    {
        return Err(DircError::InputError(format!(
            "document_id contains invalid characters: {}",
            document_id
        )));
    }
    Ok(())
}

/// Validate top_k is within a sane, non-zero range.
pub fn validate_top_k(top_k: usize) -> DircResult<()> {
    if top_k == 0 {
        return Err(DircError::InputError("top_k must be > 0".to_string()));
    }
    if top_k > 1000 {
        return Err(DircError::InputError(
            "top_k must be <= 1000".to_string(),
        ));
    }
    Ok(())
}

/// Validate embedding dimensions and finiteness.
pub fn validate_embedding(embedding: &[f32], expected_dimensions: usize) -> DircResult<()> {
    if embedding.len() != expected_dimensions {
        return Err(DircError::InputError(format!(
            "embedding must have {} dimensions, got {}",
            expected_dimensions,
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(DircError::InputError(
            "embedding contains invalid values (NaN or Inf)".to_string(),
        ));
    }
    Ok(())
}

/// Validate a retrieval query string.
pub fn validate_query(query: &str) -> DircResult<()> {
    validate_not_empty(query, "query")?;
    validate_length(query, "query", 1, 2000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(validate_not_empty("test", "field").is_ok());
        assert!(validate_not_empty("", "field").is_err());
        assert!(validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_document_id() {
        assert!(validate_document_id("boletin-2025-001").is_ok());
        assert!(validate_document_id("../etc/passwd").is_err());
        assert!(validate_document_id("").is_err());
    }

    #[test]
    fn test_validate_top_k() {
        assert!(validate_top_k(5).is_ok());
        assert!(validate_top_k(0).is_err());
        assert!(validate_top_k(5000).is_err());
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.1, 0.2, 0.3], 3).is_ok());
        assert!(validate_embedding(&[0.1, 0.2], 3).is_err());
        assert!(validate_embedding(&[f32::NAN, 0.2, 0.3], 3).is_err());
    }
}
