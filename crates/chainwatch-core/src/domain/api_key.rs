use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the public key id segment.
pub const KEY_ID_LEN: usize = 12;
/// Length of the secret segment.
pub const KEY_SECRET_LEN: usize = 32;

/// Caller category attached to every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Agent,
    Human,
}

impl ClientType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Self::Agent),
            "human" => Some(Self::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Human => "human",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// An API key row as stored. The id doubles as the public prefix embedded
/// in the raw key; the secret exists only as a one-way hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub account_id: Uuid,
    pub client_type: ClientType,
    pub status: ApiKeyStatus,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a freshly minted key. The raw secret never appears
/// here, only its hash.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub id: String,
    pub account_id: Uuid,
    pub client_type: ClientType,
    pub label: String,
    pub key_hash: String,
}

/// Scheme prefix of every raw key.
pub const KEY_SCHEME: &str = "sc";

/// Segments of a raw bearer key `sc_{env}_{id}_{secret}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub env: &'a str,
    pub id: &'a str,
    pub secret: &'a str,
}

/// Split a raw key into its segments. Returns `None` for anything that does
/// not match the `sc_{env}_{id}_{secret}` shape with the expected segment
/// lengths.
pub fn parse_api_key(raw: &str) -> Option<ParsedKey<'_>> {
    let mut parts = raw.split('_');
    let scheme = parts.next()?;
    let env = parts.next()?;
    let id = parts.next()?;
    let secret = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if scheme != KEY_SCHEME
        || env.is_empty()
        || id.len() != KEY_ID_LEN
        || secret.len() != KEY_SECRET_LEN
    {
        return None;
    }
    Some(ParsedKey { env, id, secret })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_key() {
        let raw = format!("sc_live_{}_{}", "a".repeat(12), "b".repeat(32));
        let parsed = parse_api_key(&raw).unwrap();
        assert_eq!(parsed.env, "live");
        assert_eq!(parsed.id, "a".repeat(12));
        assert_eq!(parsed.secret, "b".repeat(32));
    }

    #[test]
    fn rejects_wrong_scheme_and_shape() {
        assert!(parse_api_key("sk_live_abc_def").is_none());
        assert!(parse_api_key("sc_live_short_secret").is_none());
        assert!(parse_api_key(&format!("sc__{}_{}", "a".repeat(12), "b".repeat(32))).is_none());
        assert!(parse_api_key(&format!(
            "sc_live_{}_{}_extra",
            "a".repeat(12),
            "b".repeat(32)
        ))
        .is_none());
        assert!(parse_api_key("").is_none());
    }

    #[test]
    fn client_type_round_trips() {
        assert_eq!(ClientType::parse("agent"), Some(ClientType::Agent));
        assert_eq!(ClientType::parse("human"), Some(ClientType::Human));
        assert_eq!(ClientType::parse("robot"), None);
        assert_eq!(ClientType::Agent.as_str(), "agent");
    }
}
