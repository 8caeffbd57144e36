mod catalog;
mod crawler;
mod driver;
mod flow;
mod login;
mod openai_client;
mod page;
mod server;
mod site;
mod web;

use anyhow::{bail, Context, Result};
use flow::FlowResult;
use openai_client::OpenAIConfig;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("order") => {
            let file = args.get(1).context("usage: order-automator order <items-file>")?;
            run_order(Path::new(file)).await
        }
        Some("serve") => server::serve().await,
        Some("crawl") => {
            let input = args.get(1).cloned().unwrap_or_else(|| "initial_urls.txt".to_string());
            let output =
                args.get(2).cloned().unwrap_or_else(|| "products_links.txt".to_string());
            run_crawl(Path::new(&input), Path::new(&output)).await
        }
        Some("classify") => {
            let input =
                args.get(1).cloned().unwrap_or_else(|| "products_links.txt".to_string());
            let out_dir = args.get(2).cloned().unwrap_or_else(|| "categories".to_string());
            let cfg = OpenAIConfig::from_env()?;
            catalog::categorize_links(&cfg, Path::new(&input), Path::new(&out_dir)).await
        }
        Some("extract") => {
            let file = args
                .get(1)
                .context("usage: order-automator extract <category-file> [out-dir]")?;
            let out_dir = args.get(2).cloned().unwrap_or_else(|| "data".to_string());
            run_extract(Path::new(file), Path::new(&out_dir)).await
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("order-automator — grocery ordering and catalog tooling");
    println!();
    println!("Usage:");
    println!("  order-automator order <items-file>             add items and book a slot");
    println!("  order-automator serve                          accept orders over HTTP");
    println!("  order-automator crawl [input] [output]         collect product links");
    println!("  order-automator classify [links] [out-dir]     sort links into categories");
    println!("  order-automator extract <category-file> [dir]  scrape product data");
}

/// Run one order from a line-delimited items file.
async fn run_order(path: &Path) -> Result<()> {
    let items = crawler::read_lines(path)
        .with_context(|| format!("reading items file {}", path.display()))?;
    if items.is_empty() {
        bail!("no product URLs in {}", path.display());
    }

    let (report, result) = server::process_order(&items).await?;

    println!();
    println!("🧾 Added {}/{} items", report.succeeded.len(), report.total());
    for url in &report.failed {
        println!("   ❌ {url}");
    }
    match result {
        FlowResult::Completed => {
            println!("✅ Order flow completed");
            Ok(())
        }
        FlowResult::NoSlotAvailable => {
            println!("😞 No delivery slot available");
            Ok(())
        }
        FlowResult::Failed(e) => bail!("checkout failed: {e}"),
    }
}

async fn run_crawl(input: &Path, output: &Path) -> Result<()> {
    let mut bundle = driver::init_driver().await?;
    let outcome = crawler::crawl(&bundle.driver, input, output).await;
    driver::cleanup_driver(&mut bundle).await;
    outcome
}

async fn run_extract(category_file: &Path, out_dir: &Path) -> Result<()> {
    let cfg = OpenAIConfig::from_env()?;
    let mut bundle = driver::init_driver().await?;
    let outcome =
        catalog::extract_category_data(&bundle.driver, &cfg, category_file, out_dir).await;
    driver::cleanup_driver(&mut bundle).await;
    outcome
}
