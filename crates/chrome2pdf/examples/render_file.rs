//! Render a local HTML file to PDF
//!
//! cargo run --example render_file -- page.html out.pdf [landscape]

use chrome2pdf::{
    BrowserConfig, Deadline, Margins, Orientation, PrintOptions, PrintSettings, RenderRequest,
    Renderer, DEFAULT_RENDER_TIMEOUT,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let input = args.next().ok_or("usage: render_file <input.html> <output.pdf> [landscape]")?;
    let output = args.next().unwrap_or_else(|| "out.pdf".to_string());
    let orientation = match args.next().as_deref() {
        Some("landscape") => Orientation::Landscape,
        _ => Orientation::Portrait,
    };

    let options = PrintOptions::try_from(PrintSettings {
        orientation,
        margins: Margins::uniform(0.5),
        print_background: true,
        footer: Some(
            "<div style=\"font-size:8px;width:100%;text-align:center\">\
             <span class=\"pageNumber\"></span>/<span class=\"totalPages\"></span></div>"
                .to_string(),
        ),
        ..Default::default()
    })?;
    let request = RenderRequest::from_path(&input, options)?;

    let renderer = Renderer::new(BrowserConfig::from_env());
    let pdf = renderer
        .render(&request, &Deadline::after(DEFAULT_RENDER_TIMEOUT))
        .await?;

    std::fs::write(&output, &pdf)?;
    println!("Wrote {} bytes to {}", pdf.len(), output);

    Ok(())
}
