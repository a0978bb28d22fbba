//! Deferred credentials.
//!
//! A [`Secret`] is either static bytes or a zero-argument supplier closure.
//! The supplier form exists so secret material need not sit in process state:
//! it is invoked on the driver task at AUTH time, never by callers. The
//! encoded AUTH request is memoized inside [`Credentials`] for the life of
//! the connection record, and none of these types print their material.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::resp::writer::encode_command;

/// A username or password: static bytes, or a supplier invoked at AUTH time.
#[derive(Clone)]
pub enum Secret {
    Static(Vec<u8>),
    Supplier(Arc<dyn Fn() -> Vec<u8> + Send + Sync>),
}

impl Secret {
    /// Wrap a supplier closure.
    pub fn supplier<F>(f: F) -> Self
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        Self::Supplier(Arc::new(f))
    }

    /// Materialize the secret bytes.
    pub(crate) fn resolve(&self) -> Vec<u8> {
        match self {
            Self::Static(bytes) => bytes.clone(),
            Self::Supplier(f) => f(),
        }
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::Static(s.as_bytes().to_vec())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::Static(s.into_bytes())
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Static(bytes)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Username/password pair with the AUTH request memoized per connection
/// record.
#[derive(Clone, Default)]
pub struct Credentials {
    username: Option<Secret>,
    password: Option<Secret>,
    cached_auth: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Credentials {
    pub fn new(username: Option<Secret>, password: Option<Secret>) -> Self {
        Self {
            username,
            password,
            cached_auth: Arc::new(Mutex::new(None)),
        }
    }

    /// Password-only credentials.
    pub fn password(password: impl Into<Secret>) -> Self {
        Self::new(None, Some(password.into()))
    }

    /// Username + password credentials (ACL form).
    pub fn user(username: impl Into<Secret>, password: impl Into<Secret>) -> Self {
        Self::new(Some(username.into()), Some(password.into()))
    }

    /// True when no AUTH should be issued.
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
    }

    /// The encoded AUTH request, or `None` when no password is configured.
    ///
    /// Suppliers are invoked on first use only; subsequent calls (reconnect
    /// handshakes) reuse the memoized bytes.
    pub(crate) fn auth_command(&self) -> Option<Vec<u8>> {
        let password = self.password.as_ref()?;
        let mut cached = self.cached_auth.lock();
        if let Some(wire) = cached.as_ref() {
            return Some(wire.clone());
        }
        let pass = password.resolve();
        let wire = match &self.username {
            Some(user) => encode_command(&[b"AUTH", &user.resolve(), &pass]),
            None => encode_command(&[b"AUTH", &pass]),
        };
        *cached = Some(wire.clone());
        Some(wire)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn no_password_no_auth() {
        assert!(Credentials::default().is_empty());
        assert_eq!(Credentials::default().auth_command(), None);
        // A lone username does not trigger AUTH either.
        let creds = Credentials::new(Some("user".into()), None);
        assert_eq!(creds.auth_command(), None);
    }

    #[test]
    fn password_only_wire_form() {
        let creds = Credentials::password("sesame");
        assert_eq!(
            creds.auth_command().unwrap(),
            b"*2\r\n$4\r\nAUTH\r\n$6\r\nsesame\r\n"
        );
    }

    #[test]
    fn username_and_password_wire_form() {
        let creds = Credentials::user("admin", "sesame");
        assert_eq!(
            creds.auth_command().unwrap(),
            b"*3\r\n$4\r\nAUTH\r\n$5\r\nadmin\r\n$6\r\nsesame\r\n"
        );
    }

    #[test]
    fn supplier_is_invoked_once_and_memoized() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let creds = Credentials::new(
            None,
            Some(Secret::supplier(|| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                b"hunter2".to_vec()
            })),
        );
        let first = creds.auth_command().unwrap();
        let second = creds.auth_command().unwrap();
        assert_eq!(first, second);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_output_is_redacted() {
        let creds = Credentials::user("admin", "sesame");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("sesame"));
        assert!(!printed.contains("admin"));
        assert!(format!("{:?}", Secret::from("sesame")).contains("redacted"));
    }
}
