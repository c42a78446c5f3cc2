use std::{borrow::Cow, fmt, ops::Deref};

use serde::Deserialize;
use zeroize::Zeroize;

/// A registry password or bearer token.
///
/// The value never shows up in `Debug` output, and owned values are zeroed
/// when dropped. Use [Secret::revealed] to get at the underlying string.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// Whether the secret is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.revealed() == other.revealed()
    }
}

impl Eq for Secret {}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secret_hidden_debug() {
        let password = Secret::from(String::from("hunter2"));

        assert!(!format!("{password:?}").contains("hunter2"));
        assert_eq!(&format!("{password:?}"), "Secret(****)");
        assert_eq!(password.revealed(), "hunter2");
    }

    #[test]
    fn secret_deserializes_from_string() {
        let password: Secret = serde_json::from_str("\"s3cret\"").unwrap();
        assert_eq!(password.revealed(), "s3cret");
    }
}
