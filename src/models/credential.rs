use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::breaker::SharedBreaker;

/// An upstream vendor API credential.
///
/// Every credential has one owner. Marking it `shared` additionally places it
/// in the vendor's fallback pool, where it is subject to the shared breaker.
#[derive(Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Credential {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub vendor: String,
    pub secret: String,
    pub shared: bool,
    pub enabled: bool,
    pub shared_failure_count: i32,
    pub shared_last_failure_at: Option<DateTime<Utc>>,
    pub shared_disabled_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("owner_user_id", &self.owner_user_id)
            .field("vendor", &self.vendor)
            .field("secret", &mask_secret(&self.secret))
            .field("shared", &self.shared)
            .field("enabled", &self.enabled)
            .field("shared_failure_count", &self.shared_failure_count)
            .field("shared_disabled_until", &self.shared_disabled_until)
            .finish()
    }
}

impl Credential {
    pub fn breaker(&self) -> SharedBreaker {
        SharedBreaker {
            failure_count: self.shared_failure_count,
            last_failure_at: self.shared_last_failure_at,
            disabled_until: self.shared_disabled_until,
        }
    }

    pub fn set_breaker(&mut self, breaker: SharedBreaker) {
        self.shared_failure_count = breaker.failure_count;
        self.shared_last_failure_at = breaker.last_failure_at;
        self.shared_disabled_until = breaker.disabled_until;
    }

    pub fn view(&self) -> CredentialView {
        CredentialView {
            id: self.id,
            owner_user_id: self.owner_user_id,
            vendor: self.vendor.clone(),
            secret_preview: mask_secret(&self.secret),
            shared: self.shared,
            enabled: self.enabled,
            shared_failure_count: self.shared_failure_count,
            shared_last_failure_at: self.shared_last_failure_at,
            shared_disabled_until: self.shared_disabled_until,
            created_at: self.created_at,
        }
    }
}

/// Input for administrative credential creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCredential {
    pub owner_user_id: Uuid,
    pub vendor: String,
    pub secret: String,
    #[serde(default)]
    pub shared: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// API-facing representation. Never carries the raw secret.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialView {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub vendor: String,
    pub secret_preview: String,
    pub shared: bool,
    pub enabled: bool,
    pub shared_failure_count: i32,
    pub shared_last_failure_at: Option<DateTime<Utc>>,
    pub shared_disabled_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Vendors are matched case-insensitively: "Sora " and "sora" are the same pool.
pub fn normalize_vendor(vendor: &str) -> String {
    vendor.trim().to_ascii_lowercase()
}

/// Keep the first and last four characters; never log a full key.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdefghijklmnop"), "sk-a…mnop");
        assert_eq!(mask_secret("short"), "****");
    }

    #[test]
    fn test_normalize_vendor() {
        assert_eq!(normalize_vendor("  Sora "), "sora");
        assert_eq!(normalize_vendor("OpenAI"), "openai");
    }

    #[test]
    fn test_debug_hides_secret() {
        let cred = Credential {
            id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            vendor: "sora".into(),
            secret: "sk-live-0123456789abcdef".into(),
            shared: true,
            enabled: true,
            shared_failure_count: 0,
            shared_last_failure_at: None,
            shared_disabled_until: None,
            created_at: Utc::now(),
        };
        let dbg = format!("{:?}", cred);
        assert!(!dbg.contains("0123456789"));
        let view = serde_json::to_value(cred.view()).unwrap();
        assert!(view.get("secret").is_none());
        assert_eq!(view["secret_preview"], "sk-l…cdef");
    }

    #[test]
    fn test_new_credential_defaults() {
        let json = serde_json::json!({
            "owner_user_id": Uuid::nil(),
            "vendor": "openai",
            "secret": "sk-x"
        });
        let new: NewCredential = serde_json::from_value(json).unwrap();
        assert!(!new.shared);
        assert!(new.enabled);
    }
}
