//! Matching strategies for replay

use std::fmt;
use std::sync::Arc;

use crate::cassette::HttpRequest;
use crate::fingerprint::fingerprint_request;

/// Outcome of comparing a recorded request against a live one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    /// The recorded interaction is an acceptable answer
    pub accept: bool,
    /// Stop scanning and use this interaction
    pub short_circuit: bool,
}

impl Verdict {
    /// Accept and stop scanning
    pub const TAKE: Self = Self {
        accept: true,
        short_circuit: true,
    };

    /// Accept, but keep scanning for a later match
    pub const CANDIDATE: Self = Self {
        accept: true,
        short_circuit: false,
    };

    /// Reject and keep scanning
    pub const SKIP: Self = Self {
        accept: false,
        short_circuit: false,
    };
}

/// Predicate for [`Comparator::Custom`], called as `(recorded, live)`
pub type CompareFn = dyn Fn(&HttpRequest, &HttpRequest) -> Verdict + Send + Sync;

/// How a live request is matched against the remaining interactions
#[derive(Clone, Default)]
pub enum Comparator {
    /// Strict in-order replay: the first remaining call always matches
    #[default]
    Sequential,
    /// First remaining call with the same request fingerprint
    FirstMatch,
    /// Last remaining call with the same request fingerprint
    LastMatch,
    /// Caller supplied predicate
    Custom(Arc<CompareFn>),
}

impl Comparator {
    /// Wrap a closure as a custom comparator
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&HttpRequest, &HttpRequest) -> Verdict + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(compare))
    }

    /// Compare a recorded request against the live one
    #[must_use]
    pub fn compare(&self, recorded: &HttpRequest, live: &HttpRequest) -> Verdict {
        match self {
            Self::Sequential => Verdict::TAKE,
            Self::FirstMatch if same_request(recorded, live) => Verdict::TAKE,
            Self::LastMatch if same_request(recorded, live) => Verdict::CANDIDATE,
            Self::FirstMatch | Self::LastMatch => Verdict::SKIP,
            Self::Custom(compare) => compare(recorded, live),
        }
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("Sequential"),
            Self::FirstMatch => f.write_str("FirstMatch"),
            Self::LastMatch => f.write_str("LastMatch"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn same_request(recorded: &HttpRequest, live: &HttpRequest) -> bool {
    fingerprint_request(recorded) == fingerprint_request(live)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new("GET", path.parse().unwrap())
    }

    #[test]
    fn test_sequential_always_takes() {
        let verdict = Comparator::Sequential.compare(&get("/a"), &get("/b"));
        assert_eq!(verdict, Verdict::TAKE);
    }

    #[test]
    fn test_first_match_compares_fingerprints() {
        let comparator = Comparator::FirstMatch;
        assert_eq!(comparator.compare(&get("/a?x=1&y=2"), &get("/a?y=2&x=1")), Verdict::TAKE);
        assert_eq!(comparator.compare(&get("/a"), &get("/b")), Verdict::SKIP);
    }

    #[test]
    fn test_last_match_never_short_circuits() {
        let comparator = Comparator::LastMatch;
        assert_eq!(comparator.compare(&get("/a"), &get("/a")), Verdict::CANDIDATE);
        assert_eq!(comparator.compare(&get("/a"), &get("/b")), Verdict::SKIP);
    }

    #[test]
    fn test_custom_comparator() {
        let comparator = Comparator::custom(|recorded, live| Verdict {
            accept: recorded.method == live.method,
            short_circuit: false,
        });
        let post = HttpRequest::new("POST", "/a".parse().unwrap());
        assert!(comparator.compare(&get("/a"), &get("/z")).accept);
        assert!(!comparator.compare(&post, &get("/a")).accept);
        assert_eq!(format!("{comparator:?}"), "Custom(..)");
    }
}
