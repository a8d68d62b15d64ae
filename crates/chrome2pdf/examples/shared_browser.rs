//! Several renders sharing one browser process
//!
//! cargo run --example shared_browser -- a.html b.html c.html

use chrome2pdf::{BrowserConfig, Deadline, PrintOptions, RenderRequest, Renderer};
use futures_util::future::join_all;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let inputs: Vec<String> = std::env::args().skip(1).collect();
    if inputs.is_empty() {
        return Err("usage: shared_browser <input.html>...".into());
    }

    let renderer = Renderer::new(BrowserConfig::from_env());

    // Print state transitions as they happen
    let mut events = renderer.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("Event: {:?}", event);
        }
    });

    let browser = renderer.launch(&Deadline::after(Duration::from_secs(10))).await?;
    let deadline = Deadline::after(Duration::from_secs(60));

    let requests = inputs
        .iter()
        .map(|input| RenderRequest::from_path(input, PrintOptions::default()))
        .collect::<Result<Vec<_>, _>>()?;

    let results = join_all(
        requests
            .iter()
            .map(|request| renderer.render_with(&browser, request, &deadline)),
    )
    .await;

    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(pdf) => {
                let output = format!("{}.pdf", input);
                std::fs::write(&output, &pdf)?;
                println!("{} -> {} ({} bytes)", input, output, pdf.len());
            }
            Err(e) => println!("{}: {}", input, e),
        }
    }

    browser.close().await?;
    Ok(())
}
