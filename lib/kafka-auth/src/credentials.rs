use std::fmt;

/// Everything the caller has available for authentication.
///
/// Built once at startup and shared read-only (usually behind an `Arc`)
/// by every authenticator. There are no setters: the `with_*` methods
/// consume the value and are meant for construction only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    opaque_token: Option<String>,
    oauth_client_id: Option<String>,
    oauth_client_secret: Option<String>,
    kerberos_principal: Option<String>,
    kerberos_keytab_path: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.opaque_token = non_blank(token.into());
        self
    }

    pub fn with_oauth_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.oauth_client_id = non_blank(client_id.into());
        self.oauth_client_secret = non_blank(client_secret.into());
        self
    }

    pub fn with_kerberos(
        mut self,
        principal: impl Into<String>,
        keytab_path: impl Into<String>,
    ) -> Self {
        self.kerberos_principal = non_blank(principal.into());
        self.kerberos_keytab_path = non_blank(keytab_path.into());
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn opaque_token(&self) -> Option<&str> {
        self.opaque_token.as_deref()
    }

    pub fn oauth_client_id(&self) -> Option<&str> {
        self.oauth_client_id.as_deref()
    }

    pub fn oauth_client_secret(&self) -> Option<&str> {
        self.oauth_client_secret.as_deref()
    }

    pub fn kerberos_principal(&self) -> Option<&str> {
        self.kerberos_principal.as_deref()
    }

    pub fn kerberos_keytab_path(&self) -> Option<&str> {
        self.kerberos_keytab_path.as_deref()
    }

    /// Whether a username/password pair is present, i.e. Basic auth is an option.
    pub fn has_basic(&self) -> bool {
        !self.username.is_empty()
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redacted(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "***")
        }

        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("opaque_token", &redacted(&self.opaque_token))
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &redacted(&self.oauth_client_secret))
            .field("kerberos_principal", &self.kerberos_principal)
            .field("kerberos_keytab_path", &self.kerberos_keytab_path)
            .finish()
    }
}
