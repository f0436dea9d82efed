use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain suffix that marks a group chat JID.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Domain suffix for direct-chat (phone-bearing) JIDs.
pub const USER_SUFFIX: &str = "@s.whatsapp.net";

/// Domain suffix for linked identifiers.
pub const LID_SUFFIX: &str = "@lid";

/// The substring of an identifier before its first `@` separator.
/// Identifiers that start with `@` or carry no `@` at all have no local-part.
pub fn local_part(id: &str) -> Option<&str> {
    id.find('@').filter(|&idx| idx > 0).map(|idx| &id[..idx])
}

macro_rules! wire_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier received from the network or storage.
            /// These ids are assigned externally, never generated here.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
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

wire_id!(ChatJid);
wire_id!(MessageId);

impl ChatJid {
    /// Group chats live under the `@g.us` domain.
    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    /// Local-part of the JID, falling back to the full string when it has
    /// no `@` separator.
    pub fn local_part(&self) -> &str {
        local_part(&self.0).unwrap_or(&self.0)
    }
}
