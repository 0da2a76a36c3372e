use std::ffi::c_int;

use rusqlite::ffi;

/// Engine status code, kept opaque apart from the four codes the lifecycle
/// layer branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Error,
    /// A row is available from `step`.
    Row,
    /// The statement ran to completion.
    Done,
    Other(c_int),
}

impl Status {
    #[must_use]
    pub fn from_code(code: c_int) -> Self {
        match code {
            ffi::SQLITE_OK => Status::Ok,
            ffi::SQLITE_ERROR => Status::Error,
            ffi::SQLITE_ROW => Status::Row,
            ffi::SQLITE_DONE => Status::Done,
            other => Status::Other(other),
        }
    }

    #[must_use]
    pub fn code(self) -> c_int {
        match self {
            Status::Ok => ffi::SQLITE_OK,
            Status::Error => ffi::SQLITE_ERROR,
            Status::Row => ffi::SQLITE_ROW,
            Status::Done => ffi::SQLITE_DONE,
            Status::Other(code) => code,
        }
    }

    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl From<c_int> for Status {
    fn from(code: c_int) -> Self {
        Status::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_named_variants() {
        assert_eq!(Status::from_code(0), Status::Ok);
        assert_eq!(Status::from_code(1), Status::Error);
        assert_eq!(Status::from_code(100), Status::Row);
        assert_eq!(Status::from_code(101), Status::Done);
    }

    #[test]
    fn other_codes_keep_their_value() {
        let busy = Status::from_code(ffi::SQLITE_BUSY);
        assert_eq!(busy, Status::Other(ffi::SQLITE_BUSY));
        assert_eq!(busy.code(), ffi::SQLITE_BUSY);
        assert!(!busy.is_ok());
    }
}
