// src/web.rs
//
// Production `PageDriver` backed by a thirtyfour WebDriver session. All waits
// are bounded polls; absence is reported distinctly from a control that was
// seen but never became clickable.

use crate::page::{DriverError, PageDriver, Slot, SlotGrid};
use crate::site;
use async_trait::async_trait;
use std::env;
use std::time::Duration;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;
use tokio::time::{sleep, Instant};

pub struct WebSession {
    driver: WebDriver,
    /// Poll interval for clickability waits.
    poll: Duration,
    /// Extra attempts after a missed control. The observed site sometimes
    /// renders a control a beat after its page settles, so one retry is the
    /// default; set CONTROL_RETRIES=0 to fail fast.
    retries: usize,
    retry_pause: Duration,
}

impl WebSession {
    pub fn new(driver: WebDriver) -> Self {
        Self {
            driver,
            poll: Duration::from_millis(250),
            retries: env::var("CONTROL_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            retry_pause: Duration::from_millis(500),
        }
    }

    /// Poll until the control exists and reports clickable, or the timeout
    /// elapses.
    async fn wait_clickable(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<WebElement, DriverError> {
        let deadline = Instant::now() + timeout;
        let mut seen = false;
        loop {
            if let Ok(el) = self.driver.find(By::Css(selector)).await {
                seen = true;
                if el.is_clickable().await.unwrap_or(false) {
                    return Ok(el);
                }
            }
            if Instant::now() >= deadline {
                return Err(if seen {
                    DriverError::Timeout { selector: selector.to_string(), timeout }
                } else {
                    DriverError::Absent(selector.to_string())
                });
            }
            sleep(self.poll).await;
        }
    }

    async fn scroll_and_click(&self, el: &WebElement) -> Result<(), DriverError> {
        let _ = el.scroll_into_view().await;
        el.click().await.map_err(session_error)
    }

    async fn try_click(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let el = self.wait_clickable(selector, timeout).await?;
        self.scroll_and_click(&el).await
    }
}

fn session_error(e: WebDriverError) -> DriverError {
    DriverError::Session(e.to_string())
}

#[async_trait]
impl PageDriver for WebSession {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.driver.goto(url).await.map_err(session_error)
    }

    async fn current_location(&self) -> Result<String, DriverError> {
        Ok(self.driver.current_url().await.map_err(session_error)?.to_string())
    }

    async fn click_control(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let mut last = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                sleep(self.retry_pause).await;
            }
            match self.try_click(selector, timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(last.expect("at least one click attempt"))
    }

    async fn click_nth_control(
        &self,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let controls = self.driver.find_all(By::Css(selector)).await.unwrap_or_default();
            if let Some(el) = controls.get(index) {
                return self.scroll_and_click(el).await;
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Absent(format!("{selector}[{index}]")));
            }
            sleep(self.poll).await;
        }
    }

    async fn read_slot_grid(&self, timeout: Duration) -> Result<SlotGrid, DriverError> {
        let deadline = Instant::now() + timeout;
        let table = loop {
            if let Ok(el) = self.driver.find(By::Css(site::SEL_SLOT_TABLE)).await {
                break el;
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Absent(site::SEL_SLOT_TABLE.to_string()));
            }
            sleep(self.poll).await;
        };

        let mut grid = SlotGrid::default();
        let rows = table.find_all(By::Css("tbody tr")).await.map_err(session_error)?;
        for (row_idx, row) in rows.iter().enumerate() {
            let mut slots = Vec::new();
            let cells = row.find_all(By::Tag("td")).await.map_err(session_error)?;
            for (col_idx, cell) in cells.iter().enumerate() {
                // Cells without a booking button are headers or spacers.
                let Ok(button) = cell.find(By::Css(site::SEL_SLOT_BUTTON)).await else {
                    continue;
                };
                let class = button.attr("class").await.map_err(session_error)?.unwrap_or_default();
                let text = button.text().await.unwrap_or_default();
                slots.push(Slot {
                    row: row_idx,
                    col: col_idx,
                    is_full: class.contains(site::CLASS_SLOT_FULL),
                    is_unavailable: text.contains(site::TEXT_SLOT_UNAVAILABLE),
                });
            }
            grid.rows.push(slots);
        }
        Ok(grid)
    }

    async fn click_slot(&self, row: usize, col: usize) -> Result<(), DriverError> {
        let selector = format!(
            "{} tbody tr:nth-child({}) td:nth-child({}) {}",
            site::SEL_SLOT_TABLE,
            row + 1,
            col + 1,
            site::SEL_SLOT_BUTTON
        );
        let el = self
            .driver
            .find(By::Css(selector.as_str()))
            .await
            .map_err(|_| DriverError::Absent(selector.clone()))?;
        self.scroll_and_click(&el).await
    }
}
