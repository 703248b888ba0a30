use futures::future::BoxFuture;
use notedmark_atoms::users::{self, AuthEvent, Credentials, Identity, Session, SessionProvider};
use notedmark_atoms::AppError;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::notice::Notice;

pub const SIGN_IN_ROUTE: &str = "/auth";
pub const GALLERY_ROUTE: &str = "/";

const EVENT_BUFFER: usize = 16;

/// Whether a protected view may render.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Proceed(Identity),
    Redirect(&'static str),
}

/// Session checks in front of every protected view, plus the auth events
/// they produce.
#[derive(Clone)]
pub struct AuthGate {
    sessions: Arc<dyn SessionProvider>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthGate {
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { sessions, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn lookup(&self, token: Option<&str>) -> Option<Identity> {
        let token = token.filter(|t| !t.is_empty())?;
        match self.sessions.current_session(token).await {
            Ok(session) => session.map(|s| s.identity),
            Err(e) => {
                tracing::error!("Session lookup failed: {}", e);
                None
            }
        }
    }

    /// Proceed with the signed-in identity, or send the user to sign in.
    pub async fn enter(&self, token: Option<&str>) -> GateDecision {
        match self.lookup(token).await {
            Some(identity) => GateDecision::Proceed(identity),
            None => GateDecision::Redirect(SIGN_IN_ROUTE),
        }
    }

    /// The sign-in page itself: a live session goes straight to the gallery.
    pub async fn auth_page(&self, token: Option<&str>) -> Option<&'static str> {
        self.lookup(token).await.map(|_| GALLERY_ROUTE)
    }

    /// Register an account. The user still has to sign in afterwards.
    pub async fn sign_up(&self, credentials: &Credentials, redirect_to: &str) -> Result<Notice, AppError> {
        users::validate_sign_up(credentials)?;
        self.sessions.sign_up(credentials, redirect_to).await?;
        tracing::info!("✅ Account created: email={}", credentials.email.trim());
        Ok(Notice::success("Account created! You can now sign in.").redirect_to(SIGN_IN_ROUTE))
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<(Session, Notice), AppError> {
        users::validate_sign_in(credentials)?;
        let session = self.sessions.sign_in(credentials).await?;
        tracing::info!("✅ Signed in: user_id={}", session.identity.user_id);
        self.publish(AuthEvent::SignedIn { user_id: session.identity.user_id.clone() });
        Ok((session, Notice::success("Welcome back!").redirect_to(GALLERY_ROUTE)))
    }

    pub async fn sign_out(&self, token: Option<&str>) -> Result<Notice, AppError> {
        let user_id = self.lookup(token).await.map(|identity| identity.user_id);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.sessions.sign_out(token).await?;
        }
        tracing::info!("👋 Signed out: user_id={:?}", user_id);
        self.publish(AuthEvent::SignedOut { user_id });
        Ok(Notice::success("Signed out successfully").redirect_to(SIGN_IN_ROUTE))
    }
}

/// Run `on_redirect` with the sign-in route each time a sign-out is seen.
/// Returns once the gate is gone.
pub async fn watch_sign_out<F>(mut events: broadcast::Receiver<AuthEvent>, mut on_redirect: F)
where
    F: FnMut(&'static str) -> BoxFuture<'static, ()> + Send,
{
    loop {
        match events.recv().await {
            Ok(AuthEvent::SignedOut { .. }) => on_redirect(SIGN_IN_ROUTE).await,
            Ok(AuthEvent::SignedIn { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Auth watcher skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
