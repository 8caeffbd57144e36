// src/driver.rs
use anyhow::{bail, Context, Result};
use std::env;
use std::fs::File;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thirtyfour::prelude::*;
use which::which;

pub struct DriverBundle {
    pub driver: WebDriver,
    pub chromedriver_child: Child,
    pub user_data_dir: PathBuf,
}

pub async fn init_driver() -> Result<DriverBundle> {
    let _ = dotenvy::dotenv();

    let headless = env::var("HEADLESS").map_or(false, |v| v == "1");
    let driver_port: u16 = env::var("CHROMEDRIVER_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9515);

    let chromedriver_path =
        which("chromedriver").context("chromedriver not found in PATH. Install it or add to PATH.")?;

    let log_file = File::create(log_path()).context("cannot create chromedriver.log")?;

    let chromedriver = spawn_chromedriver(chromedriver_path.as_path(), driver_port, log_file)?;
    wait_for_port("127.0.0.1", driver_port, Duration::from_secs(10))
        .context("chromedriver did not become ready on time")?;

    let mut caps = DesiredCapabilities::chrome();

    if let Ok(bin) = env::var("CHROME_BIN") {
        caps.set_binary(&bin)?;
    } else if let Some(bin) = find_chrome_bin() {
        caps.set_binary(&bin)?;
    }

    // Fresh profile per run
    let timestamp_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    let mut user_data_dir = env::temp_dir();
    user_data_dir.push(format!("order-automator-{}", timestamp_ms));
    caps.add_arg(&format!("--user-data-dir={}", user_data_dir.to_string_lossy()))?;

    if headless {
        caps.add_arg("--headless=new")?;
    }
    caps.add_arg("--window-size=1280,900")?;
    caps.add_arg("--log-level=3")?;

    // Container-friendly flags
    caps.add_arg("--disable-gpu")?;
    caps.add_arg("--no-sandbox")?;
    caps.add_arg("--disable-dev-shm-usage")?;
    caps.add_arg("--no-default-browser-check")?;
    caps.add_arg("--no-first-run")?;
    caps.add_arg("--disable-infobars")?;

    caps.add_experimental_option("excludeSwitches", vec!["enable-automation"])?;
    caps.add_experimental_option("useAutomationExtension", false)?;

    let driver_url = format!("http://127.0.0.1:{driver_port}");
    let driver = WebDriver::new(&driver_url, caps).await?;

    Ok(DriverBundle {
        driver,
        chromedriver_child: chromedriver,
        user_data_dir,
    })
}

/// Tear the session down: browser, chromedriver child, throwaway profile.
/// Runs on every exit path; failures during teardown are ignored.
pub async fn cleanup_driver(bundle: &mut DriverBundle) {
    let _ = bundle.driver.clone().quit().await;
    let _ = bundle.chromedriver_child.kill();
    let _ = std::fs::remove_dir_all(&bundle.user_data_dir);
}

fn spawn_chromedriver(chromedriver: &Path, port: u16, log_file: File) -> Result<Child> {
    let mut cmd = Command::new(chromedriver);
    cmd.arg(format!("--port={}", port))
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file));
    let child = cmd.spawn().with_context(|| "failed to spawn chromedriver")?;
    Ok(child)
}

fn wait_for_port(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect((host, port)).is_ok() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(150));
    }
    bail!("port {}:{} did not open within {:?}", host, port, timeout)
}

fn find_chrome_bin() -> Option<String> {
    for cand in [
        "google-chrome",
        "google-chrome-stable",
        "chromium-browser",
        "chromium",
    ] {
        if let Ok(p) = which(cand) {
            return Some(p.to_string_lossy().into_owned());
        }
    }
    None
}

fn log_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join("chromedriver.log")
}
