//! Order executor.
//!
//! Drives the browser through a single market order on an instrument
//! page. Steps are strictly sequential; any failure aborts the whole
//! transaction. Once submit has been clicked the order's real-world
//! effect is not tracked unless a confirmation selector is configured.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::browser::{click_when_ready, fill_field, BrowserPage};
use crate::config::{SiteConfig, TimeoutsConfig};
use crate::types::{AgentError, Order, Side};

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

const QUANTITY_SELECTOR: &str =
    "form[data-testid='OrderForm'] input[data-testid='OrderFormRows-Shares']";
const SELL_TAB_SELECTOR: &str =
    "form[data-testid='OrderForm'] div[role='button'][data-testid='OrderFormHeading-Sell']";
const BUY_TAB_SELECTOR: &str =
    "form[data-testid='OrderForm'] div[role='button']:not([data-testid='OrderFormHeading-Sell'])";
const REVIEW_SELECTOR: &str =
    "form[data-testid='OrderForm'] [data-testid='OrderFormControls-Review']";
const SUBMIT_SELECTOR: &str =
    "form[data-testid='OrderForm'] [data-testid='OrderFormControls-Submit']";
const MFA_PASSWORD_SELECTOR: &str = "div[role='dialog'] input[name='password']";
const MFA_CONFIRM_SELECTOR: &str = "div[role='dialog'] button[type='submit']";

fn tab_selector(side: Side) -> &'static str {
    match side {
        Side::Buy => BUY_TAB_SELECTOR,
        Side::Sell => SELL_TAB_SELECTOR,
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct OrderExecutor {
    site: SiteConfig,
    timeouts: TimeoutsConfig,
}

impl OrderExecutor {
    pub fn new(site: SiteConfig, timeouts: TimeoutsConfig) -> Self {
        Self { site, timeouts }
    }

    /// Place one market order.
    ///
    /// `password` answers the second-factor prompt some orders raise
    /// after submission.
    pub async fn execute<P>(
        &self,
        page: &P,
        password: &SecretString,
        order: &Order,
    ) -> Result<(), AgentError>
    where
        P: BrowserPage + ?Sized,
    {
        let pacing = self.timeouts.pacing();
        let timeout = self.timeouts.selector();

        page.goto(&self.site.instrument_url(&order.symbol)).await?;

        fill_field(page, QUANTITY_SELECTOR, &order.shares.to_string(), pacing).await?;

        let tab = tab_selector(order.side);
        if page.probe(tab).await? {
            page.click(tab).await?;
            tokio::time::sleep(pacing.settle).await;
        } else if order.side == Side::Sell {
            return Err(AgentError::UnsupportedInstrument {
                symbol: order.symbol.clone(),
            });
        } else {
            debug!(symbol = %order.symbol, "No side tabs, form defaults to buy");
        }

        click_when_ready(page, REVIEW_SELECTOR, timeout).await?;
        tokio::time::sleep(pacing.settle).await;

        click_when_ready(page, SUBMIT_SELECTOR, timeout).await?;
        tokio::time::sleep(self.timeouts.submit_settle()).await;

        if page.probe(MFA_PASSWORD_SELECTOR).await? {
            info!(symbol = %order.symbol, "Order requires password confirmation");
            fill_field(page, MFA_PASSWORD_SELECTOR, password.expose_secret(), pacing).await?;
            page.click(MFA_CONFIRM_SELECTOR).await?;
            tokio::time::sleep(self.timeouts.submit_settle()).await;
        }

        if let Some(selector) = &self.site.confirmation_selector {
            if let Err(e) = page.wait_for_selector(selector, timeout).await {
                warn!(symbol = %order.symbol, error = %e, "No order confirmation");
                return Err(match e {
                    AgentError::UiTimeout { .. } => AgentError::OrderUnconfirmed {
                        symbol: order.symbol.clone(),
                    },
                    other => other,
                });
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
