//! Registry entities: instances, their database users, and the bindings that
//! reference those users.
//!
//! Users hold no back-reference to their instance; relationships are resolved
//! by ID (`User::instance_id`, `Binding::user_id`).

use crate::crypto::{self, EncryptionKey};
use crate::errors::{BrokerError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Role of a database user within an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserType {
    /// Administrative credential created with the instance
    Master,
    /// Tenant-facing credential created on first bind
    Standard,
    /// Reserved
    SuperUser,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Standard => "standard",
            Self::SuperUser => "superuser",
        }
    }
}

impl FromStr for UserType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master" => Ok(Self::Master),
            "standard" => Ok(Self::Standard),
            "superuser" => Ok(Self::SuperUser),
            _ => Err(BrokerError::internal(format!("Unknown user type: {}", s))),
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An application's claim on a user's credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Row ID
    pub id: String,
    /// Externally supplied binding ID
    pub binding_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(user_id: &str, binding_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            binding_id: binding_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// A database user with its encrypted password
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub instance_id: String,
    pub username: String,
    pub encrypted_password: Vec<u8>,
    pub iv: Vec<u8>,
    pub user_type: UserType,
    pub bindings: Vec<Binding>,
}

impl User {
    /// Create a user with a random password encrypted under `key`
    pub fn new(
        instance_id: &str,
        username: String,
        user_type: UserType,
        key: &EncryptionKey,
    ) -> Result<Self> {
        let mut user = Self {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            username,
            encrypted_password: Vec::new(),
            iv: Vec::new(),
            user_type,
            bindings: Vec::new(),
        };
        user.set_random_password(key)?;
        Ok(user)
    }

    /// Decrypt the stored password
    pub fn password(&self, key: &EncryptionKey) -> Result<String> {
        let plaintext = Zeroizing::new(crypto::decrypt(&self.encrypted_password, key, &self.iv)?);
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| BrokerError::crypto("Decrypted password is not valid UTF-8"))
    }

    /// Encrypt `password` under `key` with a fresh nonce
    pub fn set_password(&mut self, password: &str, key: &EncryptionKey) -> Result<()> {
        let sealed = crypto::encrypt(password.as_bytes(), key)?;
        self.encrypted_password = sealed.ciphertext;
        self.iv = sealed.nonce;
        Ok(())
    }

    pub fn set_random_password(&mut self, key: &EncryptionKey) -> Result<()> {
        let password = Zeroizing::new(crypto::random_password());
        self.set_password(&password, key)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("instance_id", &self.instance_id)
            .field("username", &self.username)
            .field("encrypted_password", &"[REDACTED]")
            .field("user_type", &self.user_type)
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// A provisioned database instance as recorded by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Externally supplied instance ID
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub db_name: String,
    pub users: Vec<User>,
}

impl Instance {
    /// Build an unsaved instance with its master user.
    ///
    /// The database name is `{db_prefix}_{instance_id}` with `-` replaced by
    /// `_`. Callers persist the result through the registry once the backing
    /// resource exists.
    pub fn new(
        service_id: &str,
        plan_id: &str,
        instance_id: &str,
        db_prefix: &str,
        key: &EncryptionKey,
    ) -> Result<Self> {
        let master = User::new(instance_id, crypto::random_username(), UserType::Master, key)?;

        Ok(Self {
            instance_id: instance_id.to_string(),
            service_id: service_id.to_string(),
            plan_id: plan_id.to_string(),
            db_name: format!("{}_{}", db_prefix, instance_id.replace('-', "_")),
            users: vec![master],
        })
    }

    pub fn master_user(&self) -> Option<&User> {
        self.users.iter().find(|user| user.user_type == UserType::Master)
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|user| user.username == username)
    }

    /// Find the non-master user holding `binding_id`, together with the binding
    pub fn binding_user(&self, binding_id: &str) -> Option<(&User, &Binding)> {
        self.users.iter().filter(|user| user.user_type != UserType::Master).find_map(|user| {
            user.bindings
                .iter()
                .find(|binding| binding.binding_id == binding_id)
                .map(|binding| (user, binding))
        })
    }

    /// Total number of bindings across all users
    pub fn binding_count(&self) -> usize {
        self.users.iter().map(|user| user.bindings.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_new_instance_has_single_master_user() {
        let instance = Instance::new("service-1", "plan-1", "abc-def-123", "cf", &key()).unwrap();

        assert_eq!(instance.db_name, "cf_abc_def_123");
        assert_eq!(instance.users.len(), 1);
        assert_eq!(instance.users[0].user_type, UserType::Master);
        assert!(instance.master_user().is_some());
        assert_eq!(instance.users[0].instance_id, "abc-def-123");
    }

    #[test]
    fn test_password_roundtrip() {
        let mut user = User::new("instance", "alice".to_string(), UserType::Standard, &key()).unwrap();
        user.set_password("s3cret", &key()).unwrap();
        assert_eq!(user.password(&key()).unwrap(), "s3cret");
        assert_ne!(user.encrypted_password, b"s3cret".to_vec());
    }

    #[test]
    fn test_password_with_wrong_key_fails() {
        let user = User::new("instance", "alice".to_string(), UserType::Standard, &key()).unwrap();
        let other = EncryptionKey::from_bytes(&[8u8; 32]).unwrap();
        assert!(matches!(user.password(&other), Err(BrokerError::Crypto { .. })));
    }

    #[test]
    fn test_binding_user_lookup() {
        let mut instance = Instance::new("s", "p", "i", "cf", &key()).unwrap();
        let mut user = User::new("i", "bob".to_string(), UserType::Standard, &key()).unwrap();
        user.bindings.push(Binding::new(&user.id, "binding-1"));
        instance.users.push(user);

        let (found, binding) = instance.binding_user("binding-1").unwrap();
        assert_eq!(found.username, "bob");
        assert_eq!(binding.binding_id, "binding-1");
        assert!(instance.binding_user("binding-2").is_none());
        assert_eq!(instance.binding_count(), 1);
    }

    #[test]
    fn test_debug_hides_password() {
        let user = User::new("i", "bob".to_string(), UserType::Standard, &key()).unwrap();
        assert!(format!("{:?}", user).contains("REDACTED"));
    }

    #[test]
    fn test_user_type_roundtrip() {
        for user_type in [UserType::Master, UserType::Standard, UserType::SuperUser] {
            assert_eq!(user_type.as_str().parse::<UserType>().unwrap(), user_type);
        }
        assert!("admin".parse::<UserType>().is_err());
    }
}
