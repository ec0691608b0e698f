//! Local authentication for the demo provider: a nickname form, no passwords

use async_trait::async_trait;
use dashmap::DashMap;
use openid2_session::{
    AttributeSet, AuthenticationContext, LocalAuthenticator, Response, SessionScope, escape_html,
};
use tracing::debug;

/// Users logged in to the provider, per browser session
#[derive(Debug)]
pub struct DemoAuthenticator {
    login_action: String,
    logged_in: DashMap<SessionScope, AttributeSet>,
}

impl DemoAuthenticator {
    pub fn new(login_action: String) -> Self {
        Self {
            login_action,
            logged_in: DashMap::new(),
        }
    }

    pub fn login(&self, scope: &SessionScope, identity: AttributeSet) {
        self.logged_in.insert(scope.clone(), identity);
    }

    pub fn logout(&self, scope: &SessionScope) {
        self.logged_in.remove(scope);
    }

    pub fn login_page(&self, notice: &str) -> Response {
        Response::Html(format!(
            "<!DOCTYPE html>\n<html><body>\
             <p>{}</p>\
             <form method=\"post\" action=\"{}\">\
             <label>Nickname <input name=\"nickname\" required></label> \
             <label>Email <input name=\"email\" type=\"email\"></label> \
             <button type=\"submit\">Log in</button>\
             </form></body></html>",
            escape_html(notice),
            escape_html(&self.login_action)
        ))
    }
}

#[async_trait]
impl LocalAuthenticator for DemoAuthenticator {
    async fn authenticate_user(
        &self,
        ctx: &AuthenticationContext<'_>,
        identity: &mut AttributeSet,
    ) -> Option<Response> {
        if let Some(user) = self.logged_in.get(ctx.scope) {
            identity.populate(user.clone());
            return None;
        }
        if ctx.immediate {
            debug!(realm = ctx.realm, "immediate request without a logged-in user");
            return Some(ctx.setup_needed());
        }
        Some(self.login_page(&format!("Log in to continue to {}", ctx.realm)))
    }
}
