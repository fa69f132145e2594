//! Prefixed entity identifiers.
//!
//! Every entity id carries a type prefix (`asst_`, `thread_`, ...) when it is
//! generated here. The prefix is a debugging aid only: ids read back from the
//! store or supplied by callers are accepted verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Type prefix used by [`Self::generate`].
            pub const PREFIX: &'static str = $prefix;

            /// Wraps an existing id string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generates a fresh, time-ordered id with the type prefix.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!("{}{}", Self::PREFIX, Uuid::now_v7().simple()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the id carries the conventional prefix.
            #[must_use]
            pub fn has_prefix(&self) -> bool {
                self.0.starts_with(Self::PREFIX)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Identifier of an assistant.
    AssistantId,
    "asst_"
);
define_id!(
    /// Identifier of a conversation thread.
    ThreadId,
    "thread_"
);
define_id!(
    /// Identifier of a message within a thread.
    MessageId,
    "msg_"
);
define_id!(
    /// Identifier of a run within a thread.
    RunId,
    "run_"
);
define_id!(
    /// Identifier of an uploaded file.
    FileId,
    "file_"
);
define_id!(
    /// Identifier of a tool definition.
    ToolId,
    "tool_"
);
