//! Thread-safe collector for errors produced by concurrent workers.

use std::sync::Mutex;

use crate::error::{Error, Result};

/// Accumulates errors from concurrent workers.
///
/// Workers call [`MultiError::add`] as they fail; the orchestrator drains the
/// collector once with [`MultiError::take`] after every worker has finished.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Mutex<Vec<Error>>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error.
    pub fn add(&self, error: Error) {
        self.lock().push(error);
    }

    /// Records the error of a failed result; successful results are ignored.
    pub fn add_result<T>(&self, result: Result<T>) {
        if let Err(error) = result {
            self.add(error);
        }
    }

    /// Number of errors recorded so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the collector into a single result.
    ///
    /// Returns `Ok(())` when nothing was recorded, the error itself when exactly
    /// one was recorded, and [`Error::Multiple`] otherwise.
    pub fn take(&self) -> Result<()> {
        let mut errors = std::mem::take(&mut *self.lock());
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Error>> {
        // push is the only mutation, so a poisoned lock still guards a valid list.
        self.errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_collector_is_ok() {
        let errors = MultiError::new();
        errors.add_result(Ok::<_, Error>(42));
        assert!(errors.is_empty());
        assert!(errors.take().is_ok());
    }

    #[test]
    fn test_single_error_is_returned_unchanged() {
        let errors = MultiError::new();
        errors.add(Error::KeyGeneration("boom".to_string()));

        let err = errors.take().unwrap_err();
        assert!(matches!(err, Error::KeyGeneration(_)));
        assert_eq!(err.to_string(), "Key generation failed: boom");
    }

    #[test]
    fn test_multiple_errors_are_prefixed_with_count() {
        let errors = MultiError::new();
        errors.add(Error::Config("a".to_string()));
        errors.add(Error::Config("b".to_string()));
        errors.add(Error::Config("c".to_string()));

        let message = errors.take().unwrap_err().to_string();
        assert!(message.starts_with("3 errors occurred:"));
    }

    #[test]
    fn test_take_drains() {
        let errors = MultiError::new();
        errors.add(Error::Config("a".to_string()));
        assert!(errors.take().is_err());
        assert!(errors.take().is_ok());
    }

    #[test]
    fn test_concurrent_adds_are_all_kept() {
        let errors = Arc::new(MultiError::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let errors = Arc::clone(&errors);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        errors.add(Error::Config(format!("{}-{}", i, j)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(errors.len(), 200);
    }
}
