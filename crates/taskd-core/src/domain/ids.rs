//! Request identifiers.
//!
//! ULID を使う: 時刻でソートでき、ログを時系列で追いやすい。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Correlates the log lines of one dispatched command.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for RequestId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_sort_by_creation_time() {
        let first = RequestId::from_ulid(Ulid::from_parts(1_000, 7));
        let second = RequestId::from_ulid(Ulid::from_parts(2_000, 1));
        assert!(first < second);
        assert!(first.to_string().starts_with("req-"));
    }
}
