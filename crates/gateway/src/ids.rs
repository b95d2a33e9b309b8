//! Sortable request/trace identifiers.
//!
//! Request and trace IDs are 26-character Crockford-base32 ULIDs: a 48-bit
//! millisecond timestamp followed by 80 bits of random payload. Two IDs
//! minted in the same millisecond sort by their random suffix, not strictly
//! by mint order — see Invariant 8.

use std::fmt;

use ulid::Ulid;

/// A minted, sortable request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(Ulid);

/// A minted, sortable trace identifier.
///
/// Distinct type from [`RequestId`] so the two can't be swapped at call
/// sites even though both wrap a ULID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceId(Ulid);

/// Error returned when a client-supplied id string isn't a well-formed ULID.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid ULID: {0}")]
pub struct ParseIdError(String);

macro_rules! ulid_wrapper {
    ($ty:ident) => {
        impl $ty {
            /// Mints a new identifier from the current wall-clock time.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parses a 26-character Crockford-base32 ULID string.
            pub fn parse(s: &str) -> Result<Self, ParseIdError> {
                Ulid::from_string(s)
                    .map($ty)
                    .map_err(|_| ParseIdError(s.to_string()))
            }

            /// Decodes the millisecond timestamp embedded in this identifier.
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $ty::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_wrapper!(RequestId);
ulid_wrapper!(TraceId);

/// Mints a new [`RequestId`]. Called once per incoming request.
#[must_use]
pub fn mint_request_id() -> RequestId {
    RequestId::new()
}

/// Mints a new [`TraceId`]. Called when the client did not supply one.
#[must_use]
pub fn mint_trace_id() -> TraceId {
    TraceId::new()
}

/// Decodes the millisecond timestamp embedded in a 26-char ULID string
/// without allocating a typed wrapper.
///
/// Rejects any input not matching length 26 and the Crockford alphabet.
pub fn parse_timestamp(id: &str) -> Result<u64, ParseIdError> {
    if id.len() != 26 {
        return Err(ParseIdError(id.to_string()));
    }
    Ulid::from_string(id)
        .map(|u| u.timestamp_ms())
        .map_err(|_| ParseIdError(id.to_string()))
}
