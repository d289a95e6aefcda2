//! Rasterizer that shells out to poppler-utils.
//!
//! `pdfinfo` answers the page count and `pdftoppm` renders single pages as
//! PNG to stdout, which is decoded in memory. Nothing is written next to the
//! PDF, so rendering never touches the working tree.

use super::backend::{Dimensions, RasterError, Rasterizer};
use super::calculations::fit_within;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

pub struct PopplerRasterizer {
    pdfinfo: PathBuf,
    pdftoppm: PathBuf,
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self {
            pdfinfo: PathBuf::from("pdfinfo"),
            pdftoppm: PathBuf::from("pdftoppm"),
        }
    }

    /// Return `true` when `pdftoppm` can be invoked from `PATH`.
    pub fn is_available() -> bool {
        Command::new("pdftoppm")
            .arg("-v")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn run(
        &self,
        tool: &'static str,
        program: &Path,
        args: &[&str],
        pdf: &Path,
    ) -> Result<Output, RasterError> {
        tracing::debug!(pdf = %pdf.display(), "{} {}", tool, args.join(" "));
        Command::new(program)
            .args(args)
            .arg(pdf)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => RasterError::ToolMissing { tool },
                _ => RasterError::Io(e),
            })
    }
}

/// Read the `Pages:` line of `pdfinfo` output.
fn parse_page_count(stdout: &str) -> Option<usize> {
    stdout.lines().find_map(|line| {
        line.strip_prefix("Pages:")
            .and_then(|v| v.trim().parse().ok())
    })
}

impl Rasterizer for PopplerRasterizer {
    fn page_count(&self, pdf: &Path) -> Result<usize, RasterError> {
        let output = self.run("pdfinfo", &self.pdfinfo, &[], pdf)?;
        if !output.status.success() {
            return Err(RasterError::Unreadable {
                path: pdf.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_page_count(&stdout) {
            Some(0) => Err(RasterError::NoPages(pdf.to_path_buf())),
            Some(n) => Ok(n),
            None => Err(RasterError::Unreadable {
                path: pdf.to_path_buf(),
                reason: "pdfinfo reported no page count".into(),
            }),
        }
    }

    fn render_page(
        &self,
        pdf: &Path,
        page_index: usize,
        target: Dimensions,
    ) -> Result<RgbaImage, RasterError> {
        let page = (page_index + 1).to_string();
        // -scale-to fits the page in a square box; the exact fit happens below.
        let scale = target.width.max(target.height).to_string();
        let output = self.run(
            "pdftoppm",
            &self.pdftoppm,
            &["-png", "-f", &page, "-l", &page, "-scale-to", &scale],
            pdf,
        )?;
        if !output.status.success() {
            return Err(RasterError::Tool {
                tool: "pdftoppm",
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(RasterError::Tool {
                tool: "pdftoppm",
                status: output.status.to_string(),
                stderr: format!("no image produced for page {}", page),
            });
        }

        let image =
            image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)?.to_rgba8();
        let fitted = fit_within(Dimensions::new(image.width(), image.height()), target);
        if fitted.width < image.width() || fitted.height < image.height() {
            Ok(imageops::resize(
                &image,
                fitted.width,
                fitted.height,
                FilterType::Lanczos3,
            ))
        } else {
            Ok(image)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_count_from_pdfinfo() {
        let out = "Title:          thesis\n\
                   Producer:       pdfTeX-1.40.25\n\
                   Pages:          12\n\
                   Page size:      595.276 x 841.89 pts (A4)\n";
        assert_eq!(parse_page_count(out), Some(12));
    }

    #[test]
    fn parse_page_count_missing() {
        assert_eq!(parse_page_count("Title: x\n"), None);
        assert_eq!(parse_page_count("Pages: many\n"), None);
    }

    #[test]
    fn missing_tool_is_reported() {
        let r = PopplerRasterizer {
            pdfinfo: PathBuf::from("/nonexistent/pdfinfo"),
            pdftoppm: PathBuf::from("/nonexistent/pdftoppm"),
        };
        let err = r.page_count(Path::new("x.pdf")).unwrap_err();
        assert!(matches!(err, RasterError::ToolMissing { tool: "pdfinfo" }));
    }

    #[test]
    fn garbage_pdf_is_unreadable() {
        if !PopplerRasterizer::is_available() {
            eprintln!("pdftoppm not on PATH, skipping");
            return;
        }
        let tmp = tempfile::TempDir::new().unwrap();
        let pdf = tmp.path().join("broken.pdf");
        std::fs::write(&pdf, "not a pdf").unwrap();
        assert!(matches!(
            PopplerRasterizer::new().page_count(&pdf),
            Err(RasterError::Unreadable { .. })
        ));
    }
}
