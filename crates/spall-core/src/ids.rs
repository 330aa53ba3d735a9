//! Branded numeric ids.
//!
//! Each entity gets its own newtype around `i64` so a `NoteId` can never
//! be handed to an operation expecting a `CorpusId`. API boundaries parse
//! strings into these with [`std::str::FromStr`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map(Self)
            }
        }
    };
}

id_newtype!(
    /// Identity of a corpus (a named bag of notes).
    CorpusId
);
id_newtype!(
    /// Identity of a workspace (a viewer).
    WorkspaceId
);
id_newtype!(
    /// Identity of a persisted query scope.
    QueryId
);
id_newtype!(
    /// Identity of a note.
    NoteId
);
id_newtype!(
    /// Identity of one chunk row in the embeddings table.
    EmbeddingId
);

impl EmbeddingId {
    /// The decimal-string form used as the vector index key.
    pub fn vector_key(self) -> String {
        self.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        fn takes_corpus(_: CorpusId) {}
        takes_corpus(CorpusId(1));
        // takes_corpus(NoteId(1)); // must not compile
    }

    #[test]
    fn parse_and_display_round_trip() {
        let id: NoteId = "42".parse().unwrap();
        assert_eq!(id, NoteId(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn vector_key_is_decimal_string() {
        assert_eq!(EmbeddingId(7).vector_key(), "7");
        assert_eq!(EmbeddingId(123456).vector_key(), "123456");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&CorpusId(3)).unwrap();
        assert_eq!(json, "3");
        let back: CorpusId = serde_json::from_str("3").unwrap();
        assert_eq!(back, CorpusId(3));
    }
}
