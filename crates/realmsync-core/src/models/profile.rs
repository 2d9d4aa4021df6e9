use serde::{Deserialize, Serialize};

/// A user profile, addressed by realm address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub address: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(rename = "followerCount", default)]
    pub follower_count: u64,
}

impl Profile {
    /// Name to render; falls back to a shortened address.
    pub fn name_or_address(&self) -> String {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.short_address(),
        }
    }

    /// Address shortened for display: "realm1qab...xyz".
    pub fn short_address(&self) -> String {
        if self.address.len() <= 13 {
            return self.address.clone();
        }
        format!(
            "{}...{}",
            &self.address[..7],
            &self.address[self.address.len() - 3..]
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(address: &str, display_name: Option<&str>) -> Profile {
        Profile {
            address: address.to_string(),
            display_name: display_name.map(str::to_string),
            avatar_url: None,
            bio: None,
            follower_count: 0,
        }
    }

    #[test]
    fn test_name_falls_back_to_short_address() {
        let p = profile("realm1qxyzabcdefghij", None);
        assert_eq!(p.name_or_address(), "realm1q...hij");

        let named = profile("realm1qxyzabcdefghij", Some("Alice"));
        assert_eq!(named.name_or_address(), "Alice");

        // Empty display names are treated as unset.
        let blank = profile("realm1qxyzabcdefghij", Some(""));
        assert_eq!(blank.name_or_address(), "realm1q...hij");
    }

    #[test]
    fn test_short_address_keeps_short_inputs() {
        assert_eq!(profile("realm1qab", None).short_address(), "realm1qab");
    }

    #[test]
    fn test_wire_field_names() {
        let json = r#"{"address":"realm1qa","displayName":"Alice","avatarUrl":null}"#;
        let p: Profile = serde_json::from_str(json).expect("parse");
        assert_eq!(p.display_name.as_deref(), Some("Alice"));
        assert_eq!(p.follower_count, 0);
    }
}
