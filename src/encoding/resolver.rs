//! Error to response-code resolution.

use std::fmt;
use std::sync::Arc;

use crate::error::ServiceError;

/// Code used when an error carries no code of its own.
pub const DEFAULT_FALLBACK_CODE: i32 = 500;

/// Host-supplied mapping from an error to its envelope code.
pub type ErrorCodeMapper = Arc<dyn Fn(&ServiceError) -> i32 + Send + Sync>;

/// Resolves the `code` written into error envelopes.
#[derive(Clone)]
pub struct ErrorCodeResolver {
    mapper: Option<ErrorCodeMapper>,
    fallback_code: i32,
}

impl ErrorCodeResolver {
    pub fn new(fallback_code: i32) -> Self {
        Self {
            mapper: None,
            fallback_code,
        }
    }

    /// Delegate every non-empty error to `mapper`. Its result is used verbatim.
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&ServiceError) -> i32 + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    pub fn with_shared_mapper(mut self, mapper: ErrorCodeMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn fallback_code(&self) -> i32 {
        self.fallback_code
    }

    pub fn has_mapper(&self) -> bool {
        self.mapper.is_some()
    }

    pub fn resolve(&self, err: Option<&ServiceError>) -> i32 {
        let Some(err) = err else {
            return self.fallback_code;
        };
        match &self.mapper {
            Some(mapper) => mapper(err),
            None => default_code(err, self.fallback_code),
        }
    }
}

impl Default for ErrorCodeResolver {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_CODE)
    }
}

impl fmt::Debug for ErrorCodeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorCodeResolver")
            .field("mapper", &self.mapper.as_ref().map(|_| "<fn>"))
            .field("fallback_code", &self.fallback_code)
            .finish()
    }
}

/// The error's own code, or `fallback` when it is zero.
pub fn default_code(err: &ServiceError, fallback: i32) -> i32 {
    if err.code != 0 {
        err.code
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_error_code() {
        let resolver = ErrorCodeResolver::default();
        let err = ServiceError::new(40301, "QUOTA", "quota exhausted");
        assert_eq!(resolver.resolve(Some(&err)), 40301);
    }

    #[test]
    fn test_zero_code_falls_back() {
        let resolver = ErrorCodeResolver::default();
        let err = ServiceError::new(0, "", "");
        assert_eq!(resolver.resolve(Some(&err)), 500);
    }

    #[test]
    fn test_none_falls_back() {
        assert_eq!(ErrorCodeResolver::new(10000).resolve(None), 10000);
    }

    #[test]
    fn test_mapper_overrides_default() {
        let resolver = ErrorCodeResolver::default().with_mapper(|_| 123456);
        let err = ServiceError::internal("DB", "connection refused");
        assert_eq!(resolver.resolve(Some(&err)), 123456);
    }

    #[test]
    fn test_mapper_output_not_validated() {
        let resolver = ErrorCodeResolver::default().with_mapper(|e| -e.code);
        let err = ServiceError::bad_request("BAD", "bad");
        assert_eq!(resolver.resolve(Some(&err)), -400);
    }

    #[test]
    fn test_mapper_not_consulted_for_none() {
        let resolver = ErrorCodeResolver::default().with_mapper(|_| 7);
        assert!(resolver.has_mapper());
        assert_eq!(resolver.resolve(None), 500);
    }

    #[test]
    fn test_mapper_sees_reason() {
        let resolver = ErrorCodeResolver::default().with_mapper(|e| match e.reason.as_str() {
            "USER_NOT_FOUND" => 20404,
            _ => e.code,
        });
        let err = ServiceError::new(404, "USER_NOT_FOUND", "no such user");
        assert_eq!(resolver.resolve(Some(&err)), 20404);
    }
}
