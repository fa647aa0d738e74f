//! OCR backends.
//!
//! Each platform ships a usable text recognizer without bundling a model:
//! the Vision framework on macOS (driven through a generated Swift
//! script), the tesseract CLI on Linux, and Windows.Media.Ocr through
//! PowerShell on Windows. All of them produce word-level spans with
//! bounding boxes in the coordinate space of the input image.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ResolveError};
use crate::types::Rect;

/// One recognized text span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSpan {
    pub text: String,
    /// Bounds in input-image (framebuffer) pixels.
    pub bounds: Rect,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
}

impl OcrSpan {
    pub fn center(&self) -> (i32, i32) {
        self.bounds.center()
    }
}

/// Text recognizer. Blocking; the resolver runs it under spawn_blocking
/// with a per-call timeout.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &RgbaImage) -> Result<Vec<OcrSpan>>;
}

/// The platform's native OCR engine.
pub struct NativeOcr;

impl NativeOcr {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for NativeOcr {
    fn recognize(&self, image: &RgbaImage) -> Result<Vec<OcrSpan>> {
        platform::recognize(image)
    }
}

/// Write the image to a temp PNG the external engine can read.
fn write_temp_png(image: &RgbaImage) -> Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!(
        "ui_resolver_ocr_{}_{}.png",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));
    image
        .save(&path)
        .map_err(|e| ResolveError::CaptureFailed(format!("failed to write OCR input: {e}")))?;
    Ok(path)
}

#[cfg(target_os = "macos")]
mod platform {
    use super::*;
    use std::process::Command;

    /// Vision framework via `swift` script: prints one JSON array of
    /// `{text, confidence, x, y, width, height}` objects, with the origin
    /// converted from Vision's bottom-left to top-left image space.
    pub fn recognize(image: &RgbaImage) -> Result<Vec<OcrSpan>> {
        let input = write_temp_png(image)?;
        let script = vision_script(&input.display().to_string());

        let script_path = std::env::temp_dir().join(format!(
            "ui_resolver_ocr_{}.swift",
            std::process::id()
        ));
        std::fs::write(&script_path, script)
            .map_err(|e| ResolveError::CaptureFailed(format!("failed to write OCR script: {e}")))?;

        let output = Command::new("swift")
            .arg(&script_path)
            .output()
            .map_err(|e| ResolveError::CaptureFailed(format!("swift not runnable: {e}")));

        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&script_path);
        let output = output?;

        if !output.status.success() {
            return Err(ResolveError::CaptureFailed(format!(
                "Vision OCR failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_vision_json(&String::from_utf8_lossy(&output.stdout))
    }

    fn parse_vision_json(stdout: &str) -> Result<Vec<OcrSpan>> {
        let stdout = stdout.trim();
        if stdout.is_empty() || stdout.starts_with("ERROR:") {
            return Ok(Vec::new());
        }

        let rows: Vec<serde_json::Value> = serde_json::from_str(stdout)
            .map_err(|e| ResolveError::CaptureFailed(format!("bad Vision output: {e}")))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let text = row["text"].as_str()?.to_string();
                Some(OcrSpan {
                    text,
                    bounds: Rect::new(
                        row["x"].as_i64()? as i32,
                        row["y"].as_i64()? as i32,
                        row["width"].as_i64()? as i32,
                        row["height"].as_i64()? as i32,
                    ),
                    confidence: row["confidence"].as_f64().unwrap_or(0.0) as f32,
                })
            })
            .filter(|span| !span.bounds.is_degenerate())
            .collect())
    }

    fn vision_script(image_path: &str) -> String {
        format!(
            r#"
import Vision
import AppKit
import Foundation

guard let image = NSImage(contentsOfFile: "{image_path}"),
      let cgImage = image.cgImage(forProposedRect: nil, context: nil, hints: nil) else {{
    print("ERROR: could not load image")
    exit(1)
}}

let request = VNRecognizeTextRequest {{ request, _ in
    guard let observations = request.results as? [VNRecognizedTextObservation] else {{
        print("[]")
        return
    }}
    var output: [[String: Any]] = []
    for observation in observations {{
        if let candidate = observation.topCandidates(1).first {{
            let box = observation.boundingBox
            output.append([
                "text": candidate.string,
                "confidence": candidate.confidence,
                "x": Int(box.origin.x * CGFloat(cgImage.width)),
                "y": Int((1 - box.origin.y - box.height) * CGFloat(cgImage.height)),
                "width": Int(box.width * CGFloat(cgImage.width)),
                "height": Int(box.height * CGFloat(cgImage.height))
            ])
        }}
    }}
    if let data = try? JSONSerialization.data(withJSONObject: output),
       let json = String(data: data, encoding: .utf8) {{
        print(json)
    }}
}}
request.recognitionLevel = .accurate
request.usesLanguageCorrection = true

let handler = VNImageRequestHandler(cgImage: cgImage, options: [:])
try? handler.perform([request])
"#
        )
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;
    use std::process::Command;

    /// Tesseract CLI with TSV output: word-level boxes plus per-word
    /// confidence on the 0-100 scale.
    pub fn recognize(image: &RgbaImage) -> Result<Vec<OcrSpan>> {
        let which = Command::new("which")
            .arg("tesseract")
            .output()
            .map_err(|e| ResolveError::CaptureFailed(format!("which failed: {e}")))?;
        if !which.status.success() {
            return Err(ResolveError::CaptureFailed(
                "tesseract is not installed (apt install tesseract-ocr)".into(),
            ));
        }

        let input = write_temp_png(image)?;
        let output = Command::new("tesseract")
            .arg(&input)
            .arg("stdout")
            .args(["-l", "eng", "--psm", "3", "tsv"])
            .output()
            .map_err(|e| ResolveError::CaptureFailed(format!("tesseract failed to run: {e}")));

        let _ = std::fs::remove_file(&input);
        let output = output?;

        if !output.status.success() {
            return Err(ResolveError::CaptureFailed(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }

    /// TSV columns: level page block par line word left top width height conf text.
    /// Words are level 5; non-word rows carry conf -1.
    pub(super) fn parse_tsv(tsv: &str) -> Vec<OcrSpan> {
        tsv.lines()
            .skip(1)
            .filter_map(|line| {
                let cols: Vec<&str> = line.split('\t').collect();
                if cols.len() < 12 || cols[0] != "5" {
                    return None;
                }
                let conf: f32 = cols[10].parse().ok()?;
                if conf < 0.0 {
                    return None;
                }
                let text = cols[11].trim();
                if text.is_empty() {
                    return None;
                }
                Some(OcrSpan {
                    text: text.to_string(),
                    bounds: Rect::new(
                        cols[6].parse().ok()?,
                        cols[7].parse().ok()?,
                        cols[8].parse().ok()?,
                        cols[9].parse().ok()?,
                    ),
                    confidence: conf / 100.0,
                })
            })
            .filter(|span| !span.bounds.is_degenerate())
            .collect()
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use std::process::Command;

    /// Windows.Media.Ocr through PowerShell/WinRT; prints one JSON array of
    /// word objects with bounding rects.
    pub fn recognize(image: &RgbaImage) -> Result<Vec<OcrSpan>> {
        let input = write_temp_png(image)?;
        let script = ocr_script(&input.display().to_string());

        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output()
            .map_err(|e| ResolveError::CaptureFailed(format!("powershell not runnable: {e}")));

        let _ = std::fs::remove_file(&input);
        let output = output?;

        if !output.status.success() {
            return Err(ResolveError::CaptureFailed(format!(
                "Windows OCR failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<serde_json::Value> = serde_json::from_str(stdout)
            .map_err(|e| ResolveError::CaptureFailed(format!("bad OCR output: {e}")))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(OcrSpan {
                    text: row["text"].as_str()?.to_string(),
                    bounds: Rect::new(
                        row["x"].as_f64()? as i32,
                        row["y"].as_f64()? as i32,
                        row["width"].as_f64()? as i32,
                        row["height"].as_f64()? as i32,
                    ),
                    // Windows.Media.Ocr exposes no per-word confidence.
                    confidence: 0.9,
                })
            })
            .filter(|span| !span.bounds.is_degenerate())
            .collect())
    }

    fn ocr_script(image_path: &str) -> String {
        format!(
            r#"
[Windows.Media.Ocr.OcrEngine,Windows.Foundation,ContentType=WindowsRuntime] | Out-Null
[Windows.Storage.StorageFile,Windows.Storage,ContentType=WindowsRuntime] | Out-Null
[Windows.Graphics.Imaging.BitmapDecoder,Windows.Graphics,ContentType=WindowsRuntime] | Out-Null

function Await($task, $type) {{
    $asTask = ([System.WindowsRuntimeSystemExtensions].GetMethods() |
        Where-Object {{ $_.Name -eq 'AsTask' -and $_.GetParameters().Count -eq 1 -and
            $_.GetParameters()[0].ParameterType.Name -eq 'IAsyncOperation`1' }})[0]
    $t = $asTask.MakeGenericMethod($type).Invoke($null, @($task))
    $t.Wait() | Out-Null
    $t.Result
}}

$file = Await ([Windows.Storage.StorageFile]::GetFileFromPathAsync('{image_path}')) ([Windows.Storage.StorageFile])
$stream = Await ($file.OpenReadAsync()) ([Windows.Storage.Streams.IRandomAccessStreamWithContentType])
$decoder = Await ([Windows.Graphics.Imaging.BitmapDecoder]::CreateAsync($stream)) ([Windows.Graphics.Imaging.BitmapDecoder])
$bitmap = Await ($decoder.GetSoftwareBitmapAsync()) ([Windows.Graphics.Imaging.SoftwareBitmap])
$engine = [Windows.Media.Ocr.OcrEngine]::TryCreateFromUserProfileLanguages()
$result = Await ($engine.RecognizeAsync($bitmap)) ([Windows.Media.Ocr.OcrResult])

$words = @()
foreach ($line in $result.Lines) {{
    foreach ($word in $line.Words) {{
        $r = $word.BoundingRect
        $words += @{{ text = $word.Text; x = $r.X; y = $r.Y; width = $r.Width; height = $r.Height }}
    }}
}}
$words | ConvertTo-Json -Compress
"#
        )
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
mod platform {
    use super::*;

    pub fn recognize(_image: &RgbaImage) -> Result<Vec<OcrSpan>> {
        Err(ResolveError::CaptureFailed(
            "no OCR engine on this platform".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    #[cfg(target_os = "linux")]
    #[test]
    fn tsv_parsing_keeps_word_rows() {
        let tsv = "level\tpage\tblock\tpar\tline\tword\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t240\t680\t40\t18\t91.5\tOK\n\
                   5\t1\t1\t1\t1\t2\t300\t680\t60\t18\t-1\t\n\
                   5\t1\t1\t1\t1\t3\t400\t680\t52\t18\t80.0\tCancel\n";
        let spans = super::platform::parse_tsv(tsv);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "OK");
        assert_eq!(spans[0].bounds.x, 240);
        assert!((spans[0].confidence - 0.915).abs() < 1e-4);
    }
}
