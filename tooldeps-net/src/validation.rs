// tooldeps-net/src/validation.rs
use tooldeps_common::error::{DepsError, Result};
use url::Url;

/// Validates a URL, ensuring it uses the HTTPS scheme.
pub fn validate_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str)
        .map_err(|e| DepsError::Generic(format!("Failed to parse URL '{url_str}': {e}")))?;
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(DepsError::ValidationError(format!(
            "Invalid URL scheme for '{}': Must be https, but got '{}'",
            url_str,
            url.scheme()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_https_is_accepted() {
        assert!(validate_url("https://quay.io/api/v1").is_ok());
        assert!(matches!(
            validate_url("http://quay.io/api/v1"),
            Err(DepsError::ValidationError(_))
        ));
        assert!(matches!(validate_url("not a url"), Err(DepsError::Generic(_))));
    }
}
