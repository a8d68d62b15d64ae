//! Print options and render requests
//!
//! `PrintSettings` is the plain, deserializable record callers fill in.
//! `PrintOptions` is the validated, immutable form handed to the browser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::cdp::protocol::PrintToPdf;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Length unit for margins and paper size. The browser works in inches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    #[serde(alias = "in")]
    Inch,
    #[serde(alias = "cm")]
    Centimeter,
    #[serde(alias = "mm")]
    Millimeter,
    #[serde(alias = "px")]
    Pixel,
}

impl Unit {
    pub fn to_inches(self, value: f64) -> f64 {
        match self {
            Unit::Inch => value,
            Unit::Centimeter => value / 2.54,
            Unit::Millimeter => value / 25.4,
            // CSS pixels: 96 per inch
            Unit::Pixel => value / 96.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }
}

impl Default for Margins {
    /// Chrome's own default of 1cm
    fn default() -> Self {
        Self::uniform(0.4)
    }
}

/// Print settings as supplied by a caller or a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    pub orientation: Orientation,
    pub margins: Margins,
    /// Unit of `margins`, `paper_width` and `paper_height`
    pub unit: Unit,
    pub paper_width: Option<f64>,
    pub paper_height: Option<f64>,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub print_background: bool,
    pub prefer_css_page_size: bool,
}

/// Validated print options. All lengths in inches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintOptions {
    orientation: Orientation,
    margins: Margins,
    paper_width: Option<f64>,
    paper_height: Option<f64>,
    header: Option<String>,
    footer: Option<String>,
    print_background: bool,
    prefer_css_page_size: bool,
}

impl TryFrom<PrintSettings> for PrintOptions {
    type Error = Error;

    fn try_from(settings: PrintSettings) -> Result<Self> {
        let unit = settings.unit;
        let m = settings.margins;
        for (name, value) in [
            ("top", m.top),
            ("right", m.right),
            ("bottom", m.bottom),
            ("left", m.left),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidOptions(format!(
                    "{} margin must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        let paper = |name: &str, value: Option<f64>| -> Result<Option<f64>> {
            match value {
                Some(v) if !v.is_finite() || v <= 0.0 => Err(Error::InvalidOptions(format!(
                    "paper {} must be positive, got {}",
                    name, v
                ))),
                Some(v) => Ok(Some(unit.to_inches(v))),
                None => Ok(None),
            }
        };

        Ok(Self {
            orientation: settings.orientation,
            margins: Margins {
                top: unit.to_inches(m.top),
                right: unit.to_inches(m.right),
                bottom: unit.to_inches(m.bottom),
                left: unit.to_inches(m.left),
            },
            paper_width: paper("width", settings.paper_width)?,
            paper_height: paper("height", settings.paper_height)?,
            header: settings.header,
            footer: settings.footer,
            print_background: settings.print_background,
            prefer_css_page_size: settings.prefer_css_page_size,
        })
    }
}

impl PrintOptions {
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn margins(&self) -> Margins {
        self.margins
    }

    /// Wire params for Page.printToPDF. A header or footer template turns
    /// header/footer display on; the missing one keeps the browser default.
    pub fn to_params(&self) -> PrintToPdf {
        PrintToPdf {
            landscape: self.orientation == Orientation::Landscape,
            print_background: self.print_background,
            prefer_css_page_size: self.prefer_css_page_size,
            margin_top: self.margins.top,
            margin_right: self.margins.right,
            margin_bottom: self.margins.bottom,
            margin_left: self.margins.left,
            paper_width: self.paper_width,
            paper_height: self.paper_height,
            display_header_footer: self.header.is_some() || self.footer.is_some(),
            header_template: self.header.clone(),
            footer_template: self.footer.clone(),
        }
    }
}

/// What to render and how to print it. Immutable once built.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    locator: Url,
    options: PrintOptions,
}

impl RenderRequest {
    /// `locator` is a URL (`file://`, `https://`, ...) or an absolute file path.
    pub fn new(locator: &str, options: PrintOptions) -> Result<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(Error::MissingContent);
        }

        let path = Path::new(locator);
        let url = if path.is_absolute() {
            Url::from_file_path(path)
                .map_err(|_| Error::InvalidOptions(format!("invalid file path '{}'", locator)))?
        } else {
            Url::parse(locator).map_err(|e| {
                Error::InvalidOptions(format!("invalid locator '{}': {}", locator, e))
            })?
        };

        Ok(Self {
            locator: url,
            options,
        })
    }

    pub fn from_path(path: impl AsRef<Path>, options: PrintOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::MissingContent);
        }
        let absolute = std::path::absolute(path)?;
        let url = Url::from_file_path(&absolute).map_err(|_| {
            Error::InvalidOptions(format!("invalid file path '{}'", absolute.display()))
        })?;
        Ok(Self {
            locator: url,
            options,
        })
    }

    pub fn locator(&self) -> &Url {
        &self.locator
    }

    pub fn options(&self) -> &PrintOptions {
        &self.options
    }
}
