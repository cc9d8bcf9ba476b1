//! Audiences and token categories.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use windcms_core::DomainError;

/// Audience of a token. Selects the signing key and the lifetime profile.
///
/// The numeric value is part of the token-cache key layout and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Admin = 1,
    App = 2,
}

impl ClientType {
    pub const ALL: [ClientType; 2] = [ClientType::Admin, ClientType::App];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientType::Admin => "admin",
            ClientType::App => "app",
        }
    }
}

impl core::fmt::Display for ClientType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" | "1" => Ok(ClientType::Admin),
            "app" | "2" => Ok(ClientType::App),
            other => Err(DomainError::bad_request(format!("invalid client type '{other}'"))),
        }
    }
}

/// Which kind of token a validation call carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenCategory {
    Access,
    Refresh,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_are_fixed() {
        assert_eq!(ClientType::Admin.as_u8(), 1);
        assert_eq!(ClientType::App.as_u8(), 2);
    }

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!("ADMIN".parse::<ClientType>().unwrap(), ClientType::Admin);
        assert_eq!("2".parse::<ClientType>().unwrap(), ClientType::App);
        assert!("web".parse::<ClientType>().is_err());
    }

    #[test]
    fn category_wire_format() {
        let c: TokenCategory = serde_json::from_str("\"REFRESH\"").unwrap();
        assert_eq!(c, TokenCategory::Refresh);
    }
}
