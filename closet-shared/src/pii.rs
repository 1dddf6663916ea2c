use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Customer contact data captured at checkout.
///
/// `Debug` and `Display` only reveal the last few characters so that logging an
/// order never leaks phone numbers or addresses. Serialization keeps the real
/// value because the snapshot is persisted and shown back to the provider.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: AsRef<str>> Redacted<T> {
    fn hint(&self) -> String {
        let raw = self.0.as_ref();
        let visible: String = raw.chars().rev().take(3).collect::<Vec<_>>().into_iter().rev().collect();
        if raw.chars().count() <= 3 {
            "***".to_string()
        } else {
            format!("***{}", visible)
        }
    }
}

impl<T: AsRef<str>> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Redacted({})", self.hint())
    }
}

impl<T: AsRef<str>> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hint())
    }
}

impl<T: Serialize> Serialize for Redacted<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_value() {
        let phone = Redacted::new("0901234567".to_string());
        assert_eq!(format!("{:?}", phone), "Redacted(***567)");
        assert_eq!(phone.to_string(), "***567");
        assert_eq!(serde_json::to_string(&phone).unwrap(), "\"0901234567\"");
    }

    #[test]
    fn test_short_values_fully_hidden() {
        let short = Redacted::new("ab".to_string());
        assert_eq!(short.to_string(), "***");
    }
}
