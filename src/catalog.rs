// src/catalog.rs
//
// Catalog tooling on top of the crawler output: sort product links into
// per-category files with the LLM, and scrape name/price/nutrition records
// for a category. Both runs are resumable; links already present in the
// output are skipped.

use crate::crawler::read_lines;
use crate::openai_client::{
    classify_product, extract_nutrition, Nutrition, OpenAIConfig, UNCATEGORIZED,
};
use crate::site;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::time::sleep;

pub const CATEGORIES: &[&str] = &[
    "Fresh fruits",
    "Fresh vegetables",
    "Greens (lettuce, herbs)",
    "Mushrooms",
    "Frozen fruits and vegetables",
    "Meat (beef, pork, poultry)",
    "Fish and seafood",
    "Sausages and bacon",
    "Plant-based meat alternatives",
    "Milk, yogurts, kefir",
    "Cheeses",
    "Butter",
    "Eggs and egg products",
    "Plant-based dairy alternatives",
    "Bread and bakery products",
    "Cakes, muffins, desserts",
    "Spices",
    "Chocolate and candies",
    "Frozen vegetables and mixes",
    "Frozen desserts and ice cream",
    "Cereals",
    "Semi-finished products (ready-made meals, salads, Kyiv cutlets, etc.)",
    "Ready meals that require minimal processing",
    "Soft drinks (soda, energy drinks)",
    "Juices, nectars and smoothies",
    "Water",
    "Tea and coffee",
    "Alcohol",
    "Canned goods and preserves",
    "Pasta, rice, cereals",
    "Sauces, seasonings and spices",
    "Oils and vinegars",
    "Snacks and cookies",
    "Nuts and dried fruits",
    "Home and household",
    "Baby food",
    "Health supplements",
];

const RECORD_SEPARATOR: char = ';';
const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Classify every link in `input` into `<category>.txt` files under
/// `out_dir`, skipping links a previous run already placed.
pub async fn categorize_links(cfg: &OpenAIConfig, input: &Path, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    let processed = classified_urls(out_dir)?;
    let urls = read_lines(input).with_context(|| format!("reading {}", input.display()))?;
    let todo: Vec<String> = urls.into_iter().filter(|u| !processed.contains(u)).collect();

    println!(
        "🔄 Resuming: {} already classified, {} remaining",
        processed.len(),
        todo.len()
    );

    for url in todo {
        let product = match classify_product(cfg, &url, CATEGORIES).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("⚠️ Error classifying {url}: {e}");
                crate::openai_client::ClassifiedProduct {
                    category: UNCATEGORIZED.to_string(),
                    name: "Unknown Product".to_string(),
                }
            }
        };
        println!("🏷️ {} → {}", product.name, product.category);
        append_line(
            &out_dir.join(format!("{}.txt", product.category)),
            &format!("{}: {}", product.name, url),
        )?;
        sleep(Duration::from_secs(1)).await;
    }

    println!("🏷️ Classification completed. Category files are in {}", out_dir.display());
    Ok(())
}

/// Scrape name, price and nutrition for every product in a category file,
/// appending `;`-separated records to `<category> data.txt` under `out_dir`.
pub async fn extract_category_data(
    driver: &WebDriver,
    cfg: &OpenAIConfig,
    category_file: &Path,
    out_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    let output = data_output_path(category_file, out_dir)?;

    let processed = extracted_urls(&output)?;
    let items: Vec<(String, String)> = read_lines(category_file)
        .with_context(|| format!("reading {}", category_file.display()))?
        .iter()
        .filter_map(|line| parse_category_line(line))
        .filter(|(_, url)| !processed.contains(url))
        .collect();

    println!(
        "🔄 Resuming: {} already extracted, {} remaining",
        processed.len(),
        items.len()
    );

    let mut accepted_cookies = false;
    for (_, url) in items {
        if !accepted_cookies {
            driver.goto(&url).await?;
            crate::login::accept_cookies(driver, site::XPATH_COOKIES_ACCEPT).await;
            accepted_cookies = true;
        }
        match extract_product(driver, cfg, &url).await {
            Ok(record) => {
                println!("🥫 {} ||| {} ||| {}", record.name, record.price, record.nutrition);
                append_line(&output, &record.to_line(&url))?;
            }
            Err(e) => eprintln!("⚠️ Failed: {url} -> {e}"),
        }
    }

    println!("🥫 Done. Output saved to {}", output.display());
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub name: String,
    pub price: String,
    pub nutrition: Nutrition,
}

impl ProductRecord {
    fn to_line(&self, url: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}true",
            self.name,
            url,
            self.price,
            self.nutrition,
            sep = RECORD_SEPARATOR
        )
    }
}

async fn extract_product(
    driver: &WebDriver,
    cfg: &OpenAIConfig,
    url: &str,
) -> Result<ProductRecord> {
    driver.goto(url).await?;

    let name_el = wait_for(driver, site::SEL_PRODUCT_NAME).await?;
    let name = name_el.text().await?.trim().to_string();

    let price = driver
        .find(By::Css(site::SEL_PRODUCT_PRICE))
        .await?
        .text()
        .await?
        .replace('£', "")
        .trim()
        .to_string();

    let nutrition = match read_nutrition(driver, cfg).await {
        Ok(n) => n,
        Err(e) => {
            eprintln!("⚠️ Nutrition extraction failed: {e}");
            Nutrition::default()
        }
    };

    Ok(ProductRecord { name, price, nutrition })
}

async fn read_nutrition(driver: &WebDriver, cfg: &OpenAIConfig) -> Result<Nutrition> {
    let table = wait_for(driver, site::SEL_NUTRITION_TABLE).await?;
    let html = table.outer_html().await?;
    extract_nutrition(cfg, &html).await
}

async fn wait_for(driver: &WebDriver, selector: &str) -> Result<thirtyfour::WebElement> {
    let deadline = tokio::time::Instant::now() + PAGE_TIMEOUT;
    loop {
        if let Ok(el) = driver.find(By::Css(selector)).await {
            return Ok(el);
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("`{selector}` not present within {PAGE_TIMEOUT:?}");
        }
        sleep(Duration::from_millis(250)).await;
    }
}

/// `Product Name: https://...` lines from category files.
pub fn parse_category_line(line: &str) -> Option<(String, String)> {
    let pos = line.find(": http")?;
    let name = line[..pos].trim().to_string();
    let url = line[pos + 2..].trim().to_string();
    Some((name, url))
}

/// URLs already present in the classified category files.
fn classified_urls(out_dir: &Path) -> Result<HashSet<String>> {
    let mut processed = HashSet::new();
    for category in CATEGORIES.iter().chain(std::iter::once(&UNCATEGORIZED)) {
        let path = out_dir.join(format!("{category}.txt"));
        if !path.exists() {
            continue;
        }
        for line in read_lines(&path)? {
            if let Some((_, url)) = parse_category_line(&line) {
                processed.insert(url);
            }
        }
    }
    Ok(processed)
}

/// URLs already present in a `;`-separated data file.
fn extracted_urls(output: &Path) -> Result<HashSet<String>> {
    if !output.exists() {
        return Ok(HashSet::new());
    }
    Ok(read_lines(output)?
        .iter()
        .filter_map(|line| {
            line.split(RECORD_SEPARATOR).nth(1).map(|url| url.trim().to_string())
        })
        .collect())
}

fn data_output_path(category_file: &Path, out_dir: &Path) -> Result<PathBuf> {
    let stem = category_file
        .file_stem()
        .and_then(|s| s.to_str())
        .context("category file has no usable name")?;
    Ok(out_dir.join(format!("{stem} data.txt")))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn category_lines_parse_name_and_url() {
        assert_eq!(
            parse_category_line("Still Water 2L: https://x/still-water-2l"),
            Some(("Still Water 2L".to_string(), "https://x/still-water-2l".to_string()))
        );
        // Colons inside the name do not break parsing.
        assert_eq!(
            parse_category_line("Choc: bar deluxe: http://x/choc"),
            Some(("Choc: bar deluxe".to_string(), "http://x/choc".to_string()))
        );
        assert_eq!(parse_category_line("no url here"), None);
    }

    #[test]
    fn classified_urls_collects_across_category_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Water.txt"),
            "Still Water: https://x/1\nSparkling Water: https://x/2\n",
        )
        .unwrap();
        fs::write(dir.path().join("Uncategorized.txt"), "Unknown Product: https://x/3\n")
            .unwrap();

        let processed = classified_urls(dir.path()).unwrap();
        assert_eq!(processed.len(), 3);
        assert!(processed.contains("https://x/2"));
        assert!(processed.contains("https://x/3"));
    }

    #[test]
    fn extracted_urls_reads_the_second_field() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("Water data.txt");
        fs::write(
            &output,
            "Still Water;https://x/1;1.10;kcal: 0, fat: 0, carbs: 0, protein: 0;true\n",
        )
        .unwrap();

        let processed = extracted_urls(&output).unwrap();
        assert_eq!(processed.len(), 1);
        assert!(processed.contains("https://x/1"));
    }

    #[test]
    fn data_output_path_uses_the_category_stem() {
        let dir = tempdir().unwrap();
        let out = data_output_path(Path::new("categories/Water.txt"), dir.path()).unwrap();
        assert_eq!(out, dir.path().join("Water data.txt"));
    }

    #[test]
    fn record_lines_are_semicolon_separated() {
        let record = ProductRecord {
            name: "Still Water".to_string(),
            price: "1.10".to_string(),
            nutrition: Nutrition::default(),
        };
        assert_eq!(
            record.to_line("https://x/1"),
            "Still Water;https://x/1;1.10;kcal: N/A, fat: N/A, carbs: N/A, protein: N/A;true"
        );
    }
}
