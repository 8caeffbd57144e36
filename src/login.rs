// src/login.rs
//
// Authentication against the grocery site. Unlike every other interaction,
// a failure here is fatal: the caller discards the session and aborts.

use crate::flow::FlowError;
use crate::site::{self, SiteConfig};
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::time::{sleep, Instant};

const LOGIN_STEP_TIMEOUT: Duration = Duration::from_secs(10);
const ACCOUNT_MARKER_TIMEOUT: Duration = Duration::from_secs(15);
const POLL: Duration = Duration::from_millis(250);

/// Log the session in. Every step is part of authentication; any miss maps
/// to `FlowError::Authentication`.
pub async fn login(driver: &WebDriver, site: &SiteConfig) -> Result<(), FlowError> {
    run_login(driver, site).await.map_err(FlowError::Authentication)
}

async fn run_login(driver: &WebDriver, site: &SiteConfig) -> Result<(), String> {
    driver
        .goto(&site.groceries_url())
        .await
        .map_err(|e| format!("landing page: {e}"))?;
    println!("🌐 Landing page loaded");

    accept_cookies(driver, site::XPATH_COOKIES_ACCEPT).await;

    wait_and_click(driver, By::LinkText(site::LINK_LOGIN), LOGIN_STEP_TIMEOUT)
        .await
        .map_err(|e| format!("login link: {e}"))?;

    // The account pages run their own consent banner.
    accept_cookies(driver, site::XPATH_COOKIES_ACCEPT_LOGIN).await;

    type_into(driver, By::Id(site::ID_USERNAME), &site.username)
        .await
        .map_err(|e| format!("username field: {e}"))?;
    type_into(driver, By::Id(site::ID_PASSWORD), &site.password)
        .await
        .map_err(|e| format!("password field: {e}"))?;
    wait_and_click(driver, By::XPath(site::XPATH_SUBMIT), LOGIN_STEP_TIMEOUT)
        .await
        .map_err(|e| format!("submit button: {e}"))?;

    wait_present(driver, By::Id(site::ID_ACCOUNT_MARKER), ACCOUNT_MARKER_TIMEOUT)
        .await
        .map_err(|e| format!("account marker after submit: {e}"))?;

    println!("🔑 Login successful");
    Ok(())
}

/// Consent banners come and go depending on profile state; a missing one is
/// not an error.
pub async fn accept_cookies(driver: &WebDriver, xpath: &str) {
    match wait_and_click(driver, By::XPath(xpath), LOGIN_STEP_TIMEOUT).await {
        Ok(()) => println!("🍪 Cookies accepted"),
        Err(_) => println!("🍪 Cookie banner not shown"),
    }
}

async fn wait_and_click(driver: &WebDriver, by: By, timeout: Duration) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(el) = driver.find(by.clone()).await {
            if el.is_clickable().await.unwrap_or(false) {
                let _ = el.scroll_into_view().await;
                return el.click().await.map_err(|e| e.to_string());
            }
        }
        if Instant::now() >= deadline {
            return Err(format!("not clickable within {timeout:?}"));
        }
        sleep(POLL).await;
    }
}

async fn wait_present(driver: &WebDriver, by: By, timeout: Duration) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        if driver.find(by.clone()).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(format!("not present within {timeout:?}"));
        }
        sleep(POLL).await;
    }
}

async fn type_into(driver: &WebDriver, by: By, text: &str) -> Result<(), String> {
    let deadline = Instant::now() + LOGIN_STEP_TIMEOUT;
    loop {
        if let Ok(el) = driver.find(by.clone()).await {
            return el.send_keys(text).await.map_err(|e| e.to_string());
        }
        if Instant::now() >= deadline {
            return Err(format!("not present within {LOGIN_STEP_TIMEOUT:?}"));
        }
        sleep(POLL).await;
    }
}
