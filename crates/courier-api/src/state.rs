use std::collections::HashSet;
use std::sync::Arc;

use tracing::error;

use courier_gateway::Dispatcher;
use courier_store::Database;
use courier_store::queries::normalize_email;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Token and account settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_ttl_secs: i64,
    /// Refresh-token lifetime. Slides forward on every refresh.
    pub session_ttl_secs: i64,
    /// Lower-cased. Registering with one of these grants the admin role.
    pub admin_emails: HashSet<String>,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            admin_emails: HashSet::new(),
        }
    }

    pub fn with_admin_emails<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.admin_emails = emails
            .into_iter()
            .map(|e| normalize_email(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails.contains(&normalize_email(email))
    }
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: AuthConfig,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(db: Database, auth: AuthConfig) -> AppState {
        Arc::new(Self {
            db: Arc::new(db),
            auth,
            dispatcher: Dispatcher::new(),
        })
    }

    /// Run a store operation off the async runtime.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> courier_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }
}
