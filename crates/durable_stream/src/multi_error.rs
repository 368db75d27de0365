use std::{fmt, io};

/// A collection of errors that occurred while performing one logical operation on many resources,
/// for instance closing every segment of a [`crate::SegmentedReader`].
///
/// A `MultiError` is never empty: [`MultiError::from_results`] returns `Ok(())` when nothing
/// failed.
#[derive(Debug)]
pub struct MultiError {
    errors: Vec<io::Error>,
}

impl MultiError {
    /// Collects all failures of `results`. Returns `Ok(())` if every result succeeded.
    pub fn from_results<I>(results: I) -> Result<(), MultiError>
    where
        I: IntoIterator<Item = io::Result<()>>,
    {
        let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MultiError { errors })
        }
    }

    /// Returns the individual errors in the order in which they occurred.
    pub fn errors(&self) -> &[io::Error] {
        &self.errors
    }

    /// Returns the number of errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always false, a `MultiError` holds at least one error.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consumes the aggregate and returns the individual errors.
    pub fn into_errors(self) -> Vec<io::Error> {
        self.errors
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred: ", self.errors.len())?;
        for (idx, err) in self.errors.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl From<MultiError> for io::Error {
    fn from(err: MultiError) -> Self {
        io::Error::other(err)
    }
}
