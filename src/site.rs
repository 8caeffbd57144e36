// src/site.rs
//
// Everything tied to the target site: entry URLs, the CSS selectors the flow
// clicks, and classification of the browser's current location into a page
// state. Selectors live here so a site redesign is a one-file change.

use anyhow::{Context, Result};
use std::env;

/// Landing page path, relative to the base URL.
pub const GROCERIES_PATH: &str = "/gol-ui/groceries";
/// Trolley (cart) page path.
pub const TROLLEY_PATH: &str = "/gol-ui/trolley";

/// Add-to-trolley button on a product detail page.
pub const SEL_ADD_TO_TROLLEY: &str =
    ".ln-c-button.ln-c-button--filled.ln-c-button--full.pt__add-button--reduced-height";
/// Primary checkout / continue CTA. The site reuses the same class on the
/// trolley page and on every interstitial.
pub const SEL_CHECKOUT_CTA: &str = ".ln-c-button.ln-c-button--filled.trolley__cta-button";
/// Any filled button; the second one on the checkout chooser is home delivery.
pub const SEL_FILLED_BUTTON: &str = ".ln-c-button.ln-c-button--filled";
/// Delivery slot grid table and the bookable cells within it.
pub const SEL_SLOT_TABLE: &str = "#slot-table";
pub const SEL_SLOT_BUTTON: &str = "button.book-slot-grid__slot";
/// Class marking a slot button as fully booked.
pub const CLASS_SLOT_FULL: &str = "book-slot-grid__slot-full";
/// Visible text marking a slot as unavailable for this account.
pub const TEXT_SLOT_UNAVAILABLE: &str = "Unavailable";
/// Reservation confirmation chain, in click order.
pub const SEL_RESERVE_CONFIRM: &str =
    ".ln-c-button.ln-c-button--filled.ln-c-button--full.reserve-slot-modal__primary-button";
pub const SEL_BOOKING_CONFIRMATION: &str =
    ".ds-c-button.ds-c-button--secondary.ds-c-button--md.booking-confirmation__button";
pub const SEL_FINAL_CONTINUE: &str = SEL_CHECKOUT_CTA;

/// Login sequence markers.
pub const XPATH_COOKIES_ACCEPT: &str = "//button[text()='Accept all']";
pub const XPATH_COOKIES_ACCEPT_LOGIN: &str = "//button[text()='Accept all cookies']";
pub const LINK_LOGIN: &str = "Log in / Register";
pub const ID_USERNAME: &str = "username";
pub const ID_PASSWORD: &str = "password";
pub const XPATH_SUBMIT: &str = "//button[@type='submit']";
pub const ID_ACCOUNT_MARKER: &str = "account-link";

/// Product links on a category listing page.
pub const SEL_PRODUCT_LINK: &str = "a.pt__link";
/// Product detail page fields.
pub const SEL_PRODUCT_NAME: &str = ".pd__header";
pub const SEL_PRODUCT_PRICE: &str = ".pd__cost__retail-price";
pub const SEL_NUTRITION_TABLE: &str = ".nutritionTable";

/// Where the checkout flow currently is, derived from the session location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Trolley,
    BeforeYouGo,
    ForgottenFavourites,
    SlotSelection,
    Summary,
    Payment,
    Unknown,
}

/// Classify a location string into a page state.
///
/// Single function, fixed precedence: the most specific markers are checked
/// first so a URL carrying more than one marker always resolves the same way.
pub fn classify_location(location: &str) -> PageState {
    let loc = location.to_ascii_lowercase();
    if loc.contains("before-you-go") {
        PageState::BeforeYouGo
    } else if loc.contains("forgotten-favourites") {
        PageState::ForgottenFavourites
    } else if loc.contains("slot") {
        PageState::SlotSelection
    } else if loc.contains("summary") {
        PageState::Summary
    } else if loc.contains("payment") {
        PageState::Payment
    } else if loc.contains("trolley") {
        PageState::Trolley
    } else {
        PageState::Unknown
    }
}

/// Site endpoint and account configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl SiteConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: env::var("GROCER_BASE_URL")
                .unwrap_or_else(|_| "https://www.sainsburys.co.uk".to_string()),
            username: env::var("GROCER_USERNAME").context("Set GROCER_USERNAME in your environment")?,
            password: env::var("GROCER_PASSWORD").context("Set GROCER_PASSWORD in your environment")?,
        })
    }

    pub fn groceries_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), GROCERIES_PATH)
    }

    pub fn trolley_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), TROLLEY_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_known_page() {
        let cases = [
            ("https://example.co.uk/gol-ui/trolley", PageState::Trolley),
            ("https://example.co.uk/checkout/before-you-go", PageState::BeforeYouGo),
            (
                "https://example.co.uk/checkout/forgotten-favourites",
                PageState::ForgottenFavourites,
            ),
            ("https://example.co.uk/gol-ui/book-a-slot", PageState::SlotSelection),
            ("https://example.co.uk/checkout/summary", PageState::Summary),
            ("https://example.co.uk/checkout/payment", PageState::Payment),
            ("https://example.co.uk/gol-ui/groceries", PageState::Unknown),
        ];
        for (url, expected) in cases {
            assert_eq!(classify_location(url), expected, "url: {url}");
        }
    }

    #[test]
    fn classification_ignores_case() {
        assert_eq!(
            classify_location("https://example.co.uk/Checkout/Before-You-Go"),
            PageState::BeforeYouGo
        );
    }

    #[test]
    fn overlapping_markers_resolve_by_precedence() {
        // An interstitial reached from the trolley keeps both markers in the
        // URL; the interstitial wins.
        assert_eq!(
            classify_location("https://example.co.uk/trolley/before-you-go"),
            PageState::BeforeYouGo
        );
        assert_eq!(
            classify_location("https://example.co.uk/checkout/summary?next=payment"),
            PageState::Summary
        );
    }

    #[test]
    fn unrecognised_locations_are_unknown() {
        assert_eq!(classify_location(""), PageState::Unknown);
        assert_eq!(classify_location("about:blank"), PageState::Unknown);
        assert_eq!(
            classify_location("https://example.co.uk/orders/123"),
            PageState::Unknown
        );
    }
}
