//! User domain model and identity channel types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery channel for one-time codes, doubling as the registration
/// identity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Email,
    Phone,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Email => "email",
            DeliveryMethod::Phone => "phone",
        }
    }
}

impl std::str::FromStr for DeliveryMethod {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(DeliveryMethod::Email),
            "phone" => Ok(DeliveryMethod::Phone),
            other => Err(crate::error::Error::invalid_field(
                "type",
                format!("unknown delivery method: {other}"),
            )),
        }
    }
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which identity kinds a deployment accepts at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Phone,
    Email,
    /// Either a phone number or an email address.
    Contact,
}

impl IdentityKind {
    pub fn allows(&self, method: DeliveryMethod) -> bool {
        match self {
            IdentityKind::Phone => method == DeliveryMethod::Phone,
            IdentityKind::Email => method == DeliveryMethod::Email,
            IdentityKind::Contact => true,
        }
    }
}

/// Deployment password policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordMode {
    /// Registration and authentication always require a password.
    Password,
    /// Onboarding through ownership proof alone; passwords optional.
    NoPassword,
}

/// A user registered with the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// ULID, lexicographically sortable and time-prefixed.
    pub id: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Argon2id PHC hash; empty in no-password deployments.
    pub password: String,
    /// AES-256-GCM encrypted TOTP shared secret; empty until generated.
    pub tfa_secret: String,
    /// The user may authenticate by verifying a randomly generated
    /// code delivered over an enabled channel.
    pub is_code_allowed: bool,
    pub is_totp_allowed: bool,
    /// Set while at least one WebAuthn device is registered.
    pub is_device_allowed: bool,
    pub is_email_otp_allowed: bool,
    pub is_phone_otp_allowed: bool,
    /// The user proved ownership of a phone or email address after
    /// registration. Once set, never cleared.
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// The user's default address for a delivery method, honoring the
    /// per-channel enablement flags.
    pub fn default_otp_address(&self, method: DeliveryMethod) -> Option<&str> {
        match method {
            DeliveryMethod::Phone if self.is_phone_otp_allowed => self.phone.as_deref(),
            DeliveryMethod::Email if self.is_email_otp_allowed => self.email.as_deref(),
            _ => None,
        }
    }

    /// A display name for the user: email, falling back to phone.
    pub fn default_name(&self) -> &str {
        self.email
            .as_deref()
            .or(self.phone.as_deref())
            .unwrap_or(&self.id)
    }

    /// True when the user retains at least one way to authenticate:
    /// a stored password or any enabled MFA channel.
    pub fn has_auth_path(&self) -> bool {
        !self.password.is_empty()
            || self.is_code_allowed
            || self.is_totp_allowed
            || self.is_device_allowed
            || self.is_email_otp_allowed
            || self.is_phone_otp_allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "01J8ZQ5YJ0000000000000TEST".into(),
            phone: Some("+15555550100".into()),
            email: Some("jane@example.com".into()),
            password: String::new(),
            tfa_secret: String::new(),
            is_code_allowed: true,
            is_totp_allowed: false,
            is_device_allowed: false,
            is_email_otp_allowed: true,
            is_phone_otp_allowed: false,
            is_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn default_address_respects_channel_flags() {
        let u = user();
        assert_eq!(
            u.default_otp_address(DeliveryMethod::Email),
            Some("jane@example.com")
        );
        // Phone OTP is disabled, so no default phone address.
        assert_eq!(u.default_otp_address(DeliveryMethod::Phone), None);
    }

    #[test]
    fn auth_path_requires_password_or_channel() {
        let mut u = user();
        assert!(u.has_auth_path());

        u.is_code_allowed = false;
        u.is_email_otp_allowed = false;
        assert!(!u.has_auth_path());

        u.password = "$argon2id$...".into();
        assert!(u.has_auth_path());
    }

    #[test]
    fn identity_kind_gating() {
        assert!(IdentityKind::Contact.allows(DeliveryMethod::Phone));
        assert!(IdentityKind::Contact.allows(DeliveryMethod::Email));
        assert!(!IdentityKind::Email.allows(DeliveryMethod::Phone));
        assert!(!IdentityKind::Phone.allows(DeliveryMethod::Email));
    }
}
