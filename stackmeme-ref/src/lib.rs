use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error as ThisError;
use uuid::Uuid;

#[derive(Clone, Debug, ThisError)]
pub enum RefError {
    #[error("Does not match as {ref_type}: {input}")]
    BadFormat {
        ref_type: &'static str,
        input: String,
    },
}

// Document ids: up to 36 chars of [a-zA-Z0-9._-], no leading special char.
fn id_regex() -> &'static Regex {
    lazy_static! {
        static ref RE: Regex = Regex::new("^[a-zA-Z0-9][a-zA-Z0-9._-]{0,35}$").unwrap();
    }
    &RE
}

macro_rules! document_ref {
    ($name:ident, $ref_type:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
        #[serde(try_from = "String")]
        pub struct $name(String);

        impl $name {
            pub fn from_string(string: String) -> Result<Self, RefError> {
                if !Self::is_match(string.as_str()) {
                    Err(RefError::BadFormat {
                        ref_type: $ref_type,
                        input: string,
                    })
                } else {
                    Ok(Self(string))
                }
            }

            // Fresh unique id, in place of the backend's ID.unique()
            pub fn unique() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            pub fn is_match(string: &str) -> bool {
                id_regex().is_match(string)
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = RefError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $name::from_string(value)
            }
        }

        impl From<&$name> for String {
            fn from(value: &$name) -> String {
                value.0.clone()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

document_ref!(MemeRef, "Meme");
document_ref!(CommentRef, "Comment");
document_ref!(IdentityRef, "Identity");
document_ref!(ReactionRef, "Reaction");
