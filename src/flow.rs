// src/flow.rs
//
// The checkout flow controller: add every requested item to the trolley, then
// drive the checkout interstitials until a delivery slot is confirmed or no
// further progress is possible. The controller owns no browser state; it is
// handed a `PageDriver` session and re-derives the page state after every
// navigation, because the site redirects without warning.

use crate::page::{DriverError, PageDriver};
use crate::site::{self, classify_location, PageState, SiteConfig};
use serde::Serialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Terminal failure kinds for a checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("no further progress after {0} redirect iterations")]
    RedirectLoopExceeded(usize),
    #[error("payment page did not clear within {0:?}")]
    PaymentTimeout(Duration),
    #[error("flow returned to the trolley after leaving it")]
    TrolleyRevisited,
    #[error("checkout ended on an unrecognised page without booking a slot")]
    NoProgress,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Terminal outcome of one checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    Completed,
    NoSlotAvailable,
    Failed(FlowError),
}

impl FlowResult {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowResult::Completed => "completed",
            FlowResult::NoSlotAvailable => "no_slot_available",
            FlowResult::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            FlowResult::Failed(e) => Some(e.to_string()),
            _ => None,
        }
    }
}

/// Per-item outcome of `add_items`. Every requested item lands in exactly
/// one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl AddReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Bounds and pacing for the flow, read once from the environment.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Iteration bound of the redirect-resolution loop.
    pub redirect_limit: usize,
    /// Wait bound for any single control to become clickable.
    pub click_timeout: Duration,
    /// Wait bound for the slot grid to render.
    pub slot_timeout: Duration,
    /// Overall bound on the payment page; exceeding it fails the flow.
    pub payment_timeout: Duration,
    /// Interval between payment-page location polls.
    pub payment_poll: Duration,
    /// Pause after navigations and clicks, letting redirects land.
    pub settle_delay: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            redirect_limit: 5,
            click_timeout: Duration::from_secs(10),
            slot_timeout: Duration::from_secs(15),
            payment_timeout: Duration::from_secs(180),
            payment_poll: Duration::from_secs(2),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl FlowConfig {
    pub fn from_env() -> Self {
        let secs = |name: &str, default: u64| {
            Duration::from_secs(
                env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default),
            )
        };
        Self {
            redirect_limit: env::var("FLOW_REDIRECT_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            click_timeout: secs("FLOW_CLICK_TIMEOUT_SECS", 10),
            slot_timeout: secs("FLOW_SLOT_TIMEOUT_SECS", 15),
            payment_timeout: secs("FLOW_PAYMENT_TIMEOUT_SECS", 180),
            payment_poll: secs("FLOW_PAYMENT_POLL_SECS", 2),
            settle_delay: Duration::from_millis(
                env::var("FLOW_SETTLE_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(2000),
            ),
        }
    }
}

/// What one slot-selection pass achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotOutcome {
    /// A slot was clicked and the confirmation chain attempted.
    Booked,
    /// The page was already at the summary; a prior run booked the slot.
    AlreadyBooked,
    /// Every slot in the grid was full or unavailable.
    NoneAvailable,
    /// The grid was not readable or the slot click missed; nothing was booked.
    NotBooked,
}

pub struct CheckoutFlow<'a, D: PageDriver> {
    driver: &'a D,
    site: SiteConfig,
    config: FlowConfig,
}

impl<'a, D: PageDriver> CheckoutFlow<'a, D> {
    pub fn new(driver: &'a D, site: SiteConfig, config: FlowConfig) -> Self {
        Self { driver, site, config }
    }

    /// Add each item to the trolley, strictly in input order. A missed add
    /// never aborts the batch; every item is attempted exactly once.
    pub async fn add_items(&self, items: &[String]) -> AddReport {
        let mut report = AddReport::default();
        for url in items {
            println!("🛒 Adding to trolley: {url}");
            match self.add_one(url).await {
                Ok(()) => report.succeeded.push(url.clone()),
                Err(e) => {
                    eprintln!("⚠️ Could not add {url}: {e}");
                    report.failed.push(url.clone());
                }
            }
            sleep(self.config.settle_delay).await;
        }
        report
    }

    async fn add_one(&self, url: &str) -> Result<(), DriverError> {
        self.driver.navigate(url).await?;
        self.driver
            .click_control(site::SEL_ADD_TO_TROLLEY, self.config.click_timeout)
            .await
    }

    /// Drive the checkout to a terminal outcome: navigate to the trolley,
    /// start the checkout, attempt a slot booking, then resolve redirects
    /// until done.
    pub async fn checkout(&self) -> FlowResult {
        if let Err(e) = self.begin_checkout().await {
            return FlowResult::Failed(e.into());
        }

        // The delivery chooser usually lands straight on the slot grid, so
        // try a booking before entering the redirect loop.
        let location = match self.driver.current_location().await {
            Ok(l) => l,
            Err(e) => return FlowResult::Failed(e.into()),
        };
        let mut slot_booked = false;
        match self.select_slot(&location).await {
            Ok(SlotOutcome::Booked) | Ok(SlotOutcome::AlreadyBooked) => slot_booked = true,
            Ok(SlotOutcome::NoneAvailable) => return FlowResult::NoSlotAvailable,
            Ok(SlotOutcome::NotBooked) => {}
            Err(e) => return FlowResult::Failed(e),
        }

        self.resolve_redirects(slot_booked).await
    }

    async fn begin_checkout(&self) -> Result<(), DriverError> {
        self.driver.navigate(&self.site.trolley_url()).await?;
        sleep(self.config.settle_delay).await;

        match self
            .driver
            .click_control(site::SEL_CHECKOUT_CTA, self.config.click_timeout)
            .await
        {
            Ok(()) => println!("🛒 Trolley complete, checkout started"),
            Err(e) => eprintln!("⚠️ Checkout button: {e}"),
        }
        sleep(self.config.settle_delay).await;

        // Second filled button on the chooser page is home delivery. Missing
        // means a slot is already booked and the site skipped the chooser.
        match self
            .driver
            .click_nth_control(site::SEL_FILLED_BUTTON, 1, self.config.click_timeout)
            .await
        {
            Ok(()) => println!("🚚 Proceeding to delivery slot selection"),
            Err(e) => eprintln!("ℹ️ Delivery chooser not shown ({e})"),
        }
        sleep(self.config.settle_delay).await;
        Ok(())
    }

    /// The redirect-resolution loop. Bounded so an unrecognised cycle in the
    /// site's page graph cannot spin forever.
    async fn resolve_redirects(&self, mut slot_booked: bool) -> FlowResult {
        let mut left_trolley = false;
        let mut summary_confirmed = false;

        for _ in 0..self.config.redirect_limit {
            let location = match self.driver.current_location().await {
                Ok(l) => l,
                Err(e) => return FlowResult::Failed(e.into()),
            };

            match classify_location(&location) {
                PageState::Trolley => {
                    // Once the flow has moved past the trolley it must not
                    // come back; that would mean the checkout was undone.
                    if left_trolley {
                        return FlowResult::Failed(FlowError::TrolleyRevisited);
                    }
                    println!("🛒 Still on the trolley, retrying checkout");
                    if let Err(e) = self
                        .driver
                        .click_control(site::SEL_CHECKOUT_CTA, self.config.click_timeout)
                        .await
                    {
                        eprintln!("⚠️ Checkout button: {e}");
                    }
                }
                PageState::BeforeYouGo => {
                    left_trolley = true;
                    println!("➡️ On the 'before you go' page");
                    self.click_continue().await;
                }
                PageState::ForgottenFavourites => {
                    left_trolley = true;
                    println!("➡️ On the 'forgotten favourites' page");
                    self.click_continue().await;
                }
                PageState::SlotSelection => {
                    left_trolley = true;
                    match self.select_slot(&location).await {
                        Ok(SlotOutcome::Booked) | Ok(SlotOutcome::AlreadyBooked) => {
                            slot_booked = true;
                        }
                        Ok(SlotOutcome::NoneAvailable) => return FlowResult::NoSlotAvailable,
                        Ok(SlotOutcome::NotBooked) => {}
                        Err(e) => return FlowResult::Failed(e),
                    }
                }
                PageState::Summary => {
                    left_trolley = true;
                    println!("🧾 On the summary page, confirming");
                    self.click_continue().await;
                    summary_confirmed = true;
                }
                PageState::Payment => {
                    left_trolley = true;
                    if let Err(e) = self.wait_payment_clear().await {
                        return FlowResult::Failed(e);
                    }
                }
                PageState::Unknown => {
                    println!("🏁 No more known redirects: {location}");
                    return if slot_booked || summary_confirmed {
                        FlowResult::Completed
                    } else {
                        FlowResult::Failed(FlowError::NoProgress)
                    };
                }
            }
            sleep(self.config.settle_delay).await;
        }

        FlowResult::Failed(FlowError::RedirectLoopExceeded(self.config.redirect_limit))
    }

    /// Book the first bookable slot, scanning the grid row-major. Skips the
    /// scan entirely when the summary page shows the slot is already booked.
    ///
    /// `location` is the signal the caller just observed; slot selection does
    /// not navigate, so it stays valid for the duration of the pass.
    async fn select_slot(&self, location: &str) -> Result<SlotOutcome, FlowError> {
        if classify_location(location) == PageState::Summary {
            println!("✅ Already on the summary page, no slot selection needed");
            return Ok(SlotOutcome::AlreadyBooked);
        }

        let grid = match self.driver.read_slot_grid(self.config.slot_timeout).await {
            Ok(grid) => grid,
            Err(DriverError::Session(e)) => return Err(DriverError::Session(e).into()),
            Err(e) => {
                eprintln!("⚠️ Slot grid not readable: {e}");
                return Ok(SlotOutcome::NotBooked);
            }
        };

        let Some(slot) = grid.first_bookable() else {
            println!("😞 No available slots found");
            return Ok(SlotOutcome::NoneAvailable);
        };

        println!("📅 First available slot: row {}, column {}", slot.row, slot.col);
        if let Err(e) = self.driver.click_slot(slot.row, slot.col).await {
            eprintln!("⚠️ Slot click failed: {e}");
            return Ok(SlotOutcome::NotBooked);
        }

        // Confirmation chain. A missed step is logged and the rest still
        // runs; completed steps are never unwound.
        for (label, selector) in [
            ("Reserve confirmation", site::SEL_RESERVE_CONFIRM),
            ("Booking confirmation", site::SEL_BOOKING_CONFIRMATION),
            ("Final continue", site::SEL_FINAL_CONTINUE),
        ] {
            sleep(self.config.settle_delay).await;
            match self.driver.click_control(selector, self.config.click_timeout).await {
                Ok(()) => println!("✅ {label} clicked"),
                Err(e) => eprintln!("⚠️ {label}: {e}"),
            }
        }
        Ok(SlotOutcome::Booked)
    }

    async fn click_continue(&self) {
        match self
            .driver
            .click_control(site::SEL_CHECKOUT_CTA, self.config.click_timeout)
            .await
        {
            Ok(()) => println!("➡️ Continue button clicked"),
            Err(e) => eprintln!("⚠️ Continue button: {e}"),
        }
    }

    /// Poll until the location stops classifying as `Payment`, bounded by
    /// the configured payment timeout.
    async fn wait_payment_clear(&self) -> Result<(), FlowError> {
        println!("💳 On the payment page, waiting for it to clear");
        let deadline = tokio::time::Instant::now() + self.config.payment_timeout;
        loop {
            sleep(self.config.payment_poll).await;
            let location = self.driver.current_location().await?;
            if classify_location(&location) != PageState::Payment {
                println!("💳 Payment finished, now at {location}");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FlowError::PaymentTimeout(self.config.payment_timeout));
            }
        }
    }
}
