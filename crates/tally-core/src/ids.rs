use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Server-side identity of one accepted socket. Never reused.
branded_id!(ConnectionId, "conn");
// Correlates a vote write with the broadcast it triggers in logs.
branded_id!(RequestId, "req");

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn request_id_has_prefix() {
        let id = RequestId::new();
        assert!(id.as_str().starts_with("req_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        let ids: HashSet<ConnectionId> = (0..1000).map(|_| ConnectionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn from_raw_roundtrips_through_display() {
        let id = ConnectionId::from_raw("conn_fixed");
        assert_eq!(id.to_string(), "conn_fixed");
        let parsed: ConnectionId = "conn_fixed".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn serializes_transparently() {
        let id = ConnectionId::from_raw("conn_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn_abc\"");
    }
}
