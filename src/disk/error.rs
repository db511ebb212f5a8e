use std::error;
use std::fmt;
use std::io;

/// Errors that can be returned from disk operations.  These are generally
/// converted into `io::Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskError {
    /// Unknown error
    Unknown,
    /// Write access attempted to read-only or write-protected media
    ReadOnly,
    /// Bad track or sector
    InvalidLocation,
    /// Offset out of bounds
    InvalidOffset,
    /// Invalid container header
    InvalidHeader,
    /// Invalid BAM
    InvalidBAM,
    /// Container size does not match any supported layout
    InvalidLayout,
    /// Block write of the wrong size
    WriteUnderrun,
    /// The volume carries no compatible file system
    NoFileSystem,
    /// File not found
    NotFound,
    /// Chain loop detected
    ChainLoop,
    /// Invalid chain link
    InvalidChainLink,
    /// Filename exceeds maximum length
    FilenameTooLong,
    /// A file with the specified filename already exists
    FileExists,
    /// Disk is full
    DiskFull,
    /// No container decoder accepted the data
    UnknownFormat,
    /// The container format cannot represent this content
    UnsupportedContent,
}

impl error::Error for DiskError {
    /// Provide terse descriptions of the errors.
    fn description(&self) -> &str {
        self.message()
    }
}

impl fmt::Display for DiskError {
    /// Provide human-readable descriptions of the errors
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &self.message())
    }
}

impl From<DiskError> for io::Error {
    fn from(error: DiskError) -> io::Error {
        use self::DiskError::*;
        use std::io::ErrorKind::*;
        match error {
            Unknown => io::Error::new(Other, error),
            ReadOnly => io::Error::new(Other, error),
            InvalidLocation => io::Error::new(InvalidInput, error),
            InvalidOffset => io::Error::new(InvalidInput, error),
            InvalidHeader => io::Error::new(InvalidData, error),
            InvalidBAM => io::Error::new(InvalidData, error),
            InvalidLayout => io::Error::new(InvalidData, error),
            WriteUnderrun => io::Error::new(InvalidInput, error),
            NoFileSystem => io::Error::new(InvalidData, error),
            self::DiskError::NotFound => io::Error::new(io::ErrorKind::NotFound, error),
            ChainLoop => io::Error::new(InvalidData, error),
            InvalidChainLink => io::Error::new(InvalidData, error),
            FilenameTooLong => io::Error::new(InvalidInput, error),
            FileExists => io::Error::new(InvalidInput, error),
            DiskFull => io::Error::new(Other, error),
            UnknownFormat => io::Error::new(InvalidData, error),
            UnsupportedContent => io::Error::new(InvalidInput, error),
        }
    }
}

impl From<io::Error> for DiskError {
    fn from(error: io::Error) -> DiskError {
        match error.into_inner() {
            Some(e) => match e.downcast_ref::<DiskError>() {
                Some(disk_error) => disk_error.clone(),
                None => DiskError::Unknown,
            },
            None => DiskError::Unknown,
        }
    }
}

impl DiskError {
    /// If the provided `io::Error` contains a `DiskError`, return the
    /// underlying `DiskError`.  If not, return None.
    pub fn from_io_error(error: &io::Error) -> Option<DiskError> {
        error
            .get_ref()
            .and_then(|e| e.downcast_ref::<DiskError>())
            .cloned()
    }

    /// This is sometimes useful instead of .into() when the compiler doesn't
    /// have enough information to perform type inference.
    pub fn to_io_error(&self) -> io::Error {
        let io_error: io::Error = self.clone().into();
        io_error
    }

    /// Provide terse descriptions of the errors.
    fn message(&self) -> &str {
        use self::DiskError::*;
        match *self {
            Unknown => "unknown error",
            ReadOnly => "write access attempted to read-only media",
            InvalidLocation => "bad track or sector",
            InvalidOffset => "offset out of bounds",
            InvalidHeader => "invalid header",
            InvalidBAM => "invalid BAM",
            InvalidLayout => "invalid layout",
            WriteUnderrun => "write underrun",
            NoFileSystem => "no compatible file system",
            NotFound => "file not found",
            ChainLoop => "chain loop detected",
            InvalidChainLink => "invalid chain link",
            FilenameTooLong => "filename exceeds maximum length",
            FileExists => "a file with the specified filename already exists",
            DiskFull => "disk is full",
            UnknownFormat => "unknown format",
            UnsupportedContent => "content cannot be stored in this format",
        }
    }
}

impl PartialEq<io::Error> for DiskError {
    fn eq(&self, other: &io::Error) -> bool {
        matches!(DiskError::from_io_error(other), Some(ref e) if e == self)
    }
}

impl PartialEq<DiskError> for io::Error {
    fn eq(&self, other: &DiskError) -> bool {
        matches!(DiskError::from_io_error(self), Some(ref e) if e == other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_round_trip() {
        let error: io::Error = DiskError::NoFileSystem.into();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
        assert_eq!(
            DiskError::from_io_error(&error),
            Some(DiskError::NoFileSystem)
        );
        assert!(error == DiskError::NoFileSystem);
        assert!(DiskError::ChainLoop != error);
        assert_eq!(format!("{}", error), "no compatible file system");
    }

    #[test]
    fn test_foreign_io_error() {
        let error = io::Error::new(io::ErrorKind::Other, "elsewhere");
        assert_eq!(DiskError::from_io_error(&error), None);
        assert_eq!(DiskError::from(error), DiskError::Unknown);
    }
}
