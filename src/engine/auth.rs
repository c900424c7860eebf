//! Login and logout against the brokerage web front end.
//!
//! A single attempt per process start; the success indicator is the
//! logged-in home page.

use secrecy::ExposeSecret;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::{click_when_ready, fill_field, BrowserPage};
use crate::config::{Credentials, SiteConfig, TimeoutsConfig};
use crate::storage;
use crate::types::AgentError;

const USERNAME_SELECTOR: &str = "input[name='username']";
const PASSWORD_SELECTOR: &str = "input[name='password']";
const SUBMIT_SELECTOR: &str = "button[type='submit']";
const SUCCESS_SELECTOR: &str = "div[data-page-name='home']";
const ACCOUNT_LINK_SELECTOR: &str = "a[href='/account']";
const LOGOUT_SELECTOR: &str = "a[href='/login']";

pub struct Authenticator {
    site: SiteConfig,
    timeouts: TimeoutsConfig,
}

impl Authenticator {
    pub fn new(site: SiteConfig, timeouts: TimeoutsConfig) -> Self {
        Self { site, timeouts }
    }

    /// Fill and submit the login form, then wait up to `timeout` for the
    /// home page. Any failure to reach it is `AuthenticationTimeout`.
    pub async fn login<P>(
        &self,
        page: &P,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<(), AgentError>
    where
        P: BrowserPage + ?Sized,
    {
        let pacing = self.timeouts.pacing();
        info!(username = %credentials.username, "Logging in...");

        page.goto(&self.site.login_url()).await?;
        fill_field(page, USERNAME_SELECTOR, &credentials.username, pacing).await?;
        fill_field(
            page,
            PASSWORD_SELECTOR,
            credentials.password.expose_secret(),
            pacing,
        )
        .await?;
        page.click(SUBMIT_SELECTOR).await?;
        debug!("Login form submitted");

        match page.wait_for_selector(SUCCESS_SELECTOR, timeout).await {
            Ok(()) => {
                info!("Logged in...");
                Ok(())
            }
            Err(AgentError::UiTimeout { .. }) => Err(AgentError::AuthenticationTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(e) => Err(e),
        }
    }

    /// Open the account menu and follow the logout link.
    pub async fn logout<P>(&self, page: &P) -> Result<(), AgentError>
    where
        P: BrowserPage + ?Sized,
    {
        let timeout = self.timeouts.selector();
        click_when_ready(page, ACCOUNT_LINK_SELECTOR, timeout).await?;
        click_when_ready(page, LOGOUT_SELECTOR, timeout).await?;
        info!("Logged out");
        Ok(())
    }

    /// Auth-only shutdown: log out, then persist whatever session the
    /// browser holds. The session is saved even when logout fails.
    pub async fn logout_and_save<P>(&self, page: &P, session_file: &Path) -> Result<(), AgentError>
    where
        P: BrowserPage + ?Sized,
    {
        let result = self.logout(page).await;
        storage::save_session(page, session_file).await;
        result
    }
}
