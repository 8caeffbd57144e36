// src/crawler.rs
//
// Collects product links from category listing pages and appends the new
// ones to a line-delimited output file. Already-known links are skipped so
// repeated runs only grow the file.

use crate::login;
use crate::site;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thirtyfour::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub added: usize,
    pub duplicates: usize,
}

/// Visit every category page listed in `input` and append newly discovered
/// product links to `output`.
pub async fn crawl(driver: &WebDriver, input: &Path, output: &Path) -> Result<()> {
    let pages = read_lines(input)
        .with_context(|| format!("reading input file {}", input.display()))?;
    if pages.is_empty() {
        bail!("input file {} is empty", input.display());
    }

    driver.goto(&pages[0]).await?;
    login::accept_cookies(driver, site::XPATH_COOKIES_ACCEPT).await;

    for url in &pages {
        println!("\n📄 Processing page: {url}");
        match collect_links_from_page(driver, url).await {
            Ok(hrefs) => {
                let report = save_links(output, &hrefs)
                    .with_context(|| format!("saving links to {}", output.display()))?;
                if report.added > 0 {
                    println!("🔗 Added {} new links", report.added);
                } else {
                    println!("🔗 No new links found");
                }
                if report.duplicates > 0 {
                    println!("🔗 {} duplicate links skipped", report.duplicates);
                }
            }
            Err(e) => eprintln!("⚠️ Error parsing links from page {url}: {e}"),
        }
    }
    Ok(())
}

/// All product hrefs on the page, de-duplicated, in document order.
pub async fn collect_links_from_page(
    driver: &WebDriver,
    url: &str,
) -> Result<Vec<String>> {
    driver.goto(url).await?;
    let links = driver.find_all(By::Css(site::SEL_PRODUCT_LINK)).await?;
    let mut hrefs = Vec::new();
    for link in links {
        if let Some(href) = link.attr("href").await? {
            hrefs.push(href);
        }
    }
    Ok(dedupe(hrefs))
}

/// Append links not already present in `output`; returns what was added and
/// what was skipped.
pub fn save_links(output: &Path, hrefs: &[String]) -> Result<LinkReport> {
    let existing: HashSet<String> = if output.exists() {
        read_lines(output)?.into_iter().collect()
    } else {
        HashSet::new()
    };

    let mut report = LinkReport::default();
    let mut new_links = String::new();
    for href in hrefs {
        if existing.contains(href) {
            report.duplicates += 1;
        } else {
            new_links.push_str(href);
            new_links.push('\n');
            report.added += 1;
        }
    }

    if report.added > 0 {
        let mut contents = if output.exists() {
            fs::read_to_string(output)?
        } else {
            String::new()
        };
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&new_links);
        fs::write(output, contents)?;
    }
    Ok(report)
}

fn dedupe(hrefs: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hrefs.into_iter().filter(|h| seen.insert(h.clone())).collect()
}

pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn dedupe_keeps_first_occurrence_in_order() {
        let out = dedupe(s(&["a", "b", "a", "c", "b"]));
        assert_eq!(out, s(&["a", "b", "c"]));
    }

    #[test]
    fn save_links_appends_only_new_links() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("products_links.txt");

        let first = save_links(&output, &s(&["https://x/1", "https://x/2"])).unwrap();
        assert_eq!(first, LinkReport { added: 2, duplicates: 0 });

        let second = save_links(&output, &s(&["https://x/2", "https://x/3"])).unwrap();
        assert_eq!(second, LinkReport { added: 1, duplicates: 1 });

        assert_eq!(
            read_lines(&output).unwrap(),
            s(&["https://x/1", "https://x/2", "https://x/3"])
        );
    }

    #[test]
    fn save_links_with_nothing_new_leaves_the_file_alone() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("products_links.txt");
        save_links(&output, &s(&["https://x/1"])).unwrap();

        let report = save_links(&output, &s(&["https://x/1"])).unwrap();
        assert_eq!(report, LinkReport { added: 0, duplicates: 1 });
        assert_eq!(read_lines(&output).unwrap(), s(&["https://x/1"]));
    }

    #[test]
    fn read_lines_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("initial_urls.txt");
        fs::write(&path, "https://x/a\n\n  \nhttps://x/b\n").unwrap();
        assert_eq!(read_lines(&path).unwrap(), s(&["https://x/a", "https://x/b"]));
    }
}
