use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{error, info};

use super::ensure_directory;
use crate::error::{Error, Result};

/// Image formats a figure may be saved as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotFormat {
    Png,
    Pdf,
    Ps,
    Eps,
    Svg,
    Jpeg,
    Jpg,
    Tiff,
}

impl PlotFormat {
    pub const ALL: [PlotFormat; 8] = [
        PlotFormat::Png,
        PlotFormat::Pdf,
        PlotFormat::Ps,
        PlotFormat::Eps,
        PlotFormat::Svg,
        PlotFormat::Jpeg,
        PlotFormat::Jpg,
        PlotFormat::Tiff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlotFormat::Png => "png",
            PlotFormat::Pdf => "pdf",
            PlotFormat::Ps => "ps",
            PlotFormat::Eps => "eps",
            PlotFormat::Svg => "svg",
            PlotFormat::Jpeg => "jpeg",
            PlotFormat::Jpg => "jpg",
            PlotFormat::Tiff => "tiff",
        }
    }

    fn allow_list() -> String {
        Self::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for PlotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlotFormat {
    type Err = Error;

    /// Matches the lower-case names exactly; `PNG` is not accepted.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| Error::UnsupportedPlotFormat {
                extension: s.to_string(),
                supported: Self::allow_list(),
            })
    }
}

/// Anything that knows how to render itself to an image file.
pub trait Figure {
    fn save(&self, path: &Path, format: PlotFormat) -> Result<()>;
}

/// Validates the extension, creates the destination folder and hands the
/// path to the figure's own save routine.
pub fn save_plot<F: Figure + ?Sized>(figure: &F, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let format: PlotFormat = extension.parse().inspect_err(|e| {
        error!(path = %path.display(), "{}", e);
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }

    figure.save(path, format)?;
    info!(path = %path.display(), format = %format, "Plot saved");
    Ok(())
}
