//! Screen capture adapter -- grab the deck overlay region with the platform
//! capture command.
//!
//! Shells out to `screencapture` on macOS and `grim` elsewhere, writing a
//! timestamped JPEG into the configured shots directory. The child process is
//! killed on timeout via `kill_on_drop`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde_json::{Value, json};
use tracing::{debug, info};

use neurodeck_engine::{Capability, CapabilityError, CapabilityResult};

use crate::config::{CaptureRegion, CaptureSettings};

/// Filename label used when a request names none.
const DEFAULT_LABEL: &str = "screenshot";

/// Longest label carried into a filename.
const MAX_LABEL_CHARS: usize = 40;

/// Screen capture capability.
pub struct ScreenCapture {
    /// Region of the screen to grab.
    region: CaptureRegion,
    /// Directory snapshots land in.
    shots_dir: PathBuf,
    /// Time allowed for the capture command.
    timeout: Duration,
}

impl ScreenCapture {
    /// Create a capture adapter from its settings section.
    pub fn new(settings: &CaptureSettings) -> Self {
        Self {
            region: settings.region.clone(),
            shots_dir: settings.shots_dir.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Target path for a shot taken now: `{label}_{YYYYmmdd_HHMMSS}.jpg`.
    fn shot_path(&self, label: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.shots_dir.join(format!("{label}_{stamp}.jpg"))
    }

    /// Platform capture command for the configured region.
    fn capture_command(&self, path: &Path) -> (&'static str, Vec<String>) {
        let region = &self.region;
        if cfg!(target_os = "macos") {
            (
                "screencapture",
                vec![
                    "-x".to_string(),
                    "-t".to_string(),
                    "jpg".to_string(),
                    format!(
                        "-R{},{},{},{}",
                        region.left, region.top, region.width, region.height
                    ),
                    path.display().to_string(),
                ],
            )
        } else {
            (
                "grim",
                vec![
                    "-t".to_string(),
                    "jpeg".to_string(),
                    "-g".to_string(),
                    format!(
                        "{},{} {}x{}",
                        region.left, region.top, region.width, region.height
                    ),
                    path.display().to_string(),
                ],
            )
        }
    }
}

/// Reduce a label to filename-safe characters, falling back to
/// [`DEFAULT_LABEL`] when nothing survives.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_LABEL_CHARS)
        .collect();
    if cleaned.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl Capability for ScreenCapture {
    fn name(&self) -> &str {
        "capture"
    }

    async fn invoke(&self, request: Value) -> CapabilityResult {
        if self.region.width == 0 || self.region.height == 0 {
            return Err(CapabilityError::InvalidRequest {
                reason: format!(
                    "capture region {}x{} has no area",
                    self.region.width, self.region.height
                ),
            });
        }

        let label = sanitize_label(
            request
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_LABEL),
        );

        tokio::fs::create_dir_all(&self.shots_dir).await?;
        let path = self.shot_path(&label);
        let (program, args) = self.capture_command(&path);

        debug!(program, path = %path.display(), "capturing screen region");

        let child = tokio::process::Command::new(program)
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CapabilityError::Unavailable {
                reason: format!("failed to start `{program}`: {e}"),
            })?;

        // On timeout the child is dropped and killed via kill_on_drop(true).
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CapabilityError::Io(e)),
            Err(_) => {
                return Err(CapabilityError::Transport {
                    reason: format!(
                        "`{program}` did not finish within {}s",
                        self.timeout.as_secs()
                    ),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Unavailable {
                reason: format!("`{program}` exited with {}: {}", output.status, stderr.trim()),
            });
        }

        info!(path = %path.display(), "screen region captured");

        Ok(json!({
            "path": path.display().to_string(),
            "width": self.region.width,
            "height": self.region.height,
            "captured_at": chrono::Utc::now(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureSettings;

    #[test]
    fn labels_are_reduced_to_filename_safe_characters() {
        assert_eq!(sanitize_label("emergency"), "emergency");
        assert_eq!(sanitize_label("stress relief!"), "stress_relief_");
        assert_eq!(sanitize_label("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_label(""), "screenshot");
        assert_eq!(sanitize_label("🙂🙂"), "__");
    }

    #[test]
    fn long_labels_are_capped() {
        let label = "x".repeat(MAX_LABEL_CHARS * 2);
        assert_eq!(sanitize_label(&label).len(), MAX_LABEL_CHARS);
    }

    #[test]
    fn shot_paths_land_in_the_shots_dir_as_jpg() {
        let capture = ScreenCapture::new(&CaptureSettings::default());
        let path = capture.shot_path("emergency");
        assert!(path.starts_with("shots"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("emergency_"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn capture_command_targets_the_configured_region() {
        let capture = ScreenCapture::new(&CaptureSettings::default());
        let (program, args) = capture.capture_command(Path::new("/tmp/shot.jpg"));
        if cfg!(target_os = "macos") {
            assert_eq!(program, "screencapture");
            assert!(args.contains(&"-R25,140,400,600".to_string()));
        } else {
            assert_eq!(program, "grim");
            assert!(args.contains(&"25,140 400x600".to_string()));
        }
        assert_eq!(args.last().map(String::as_str), Some("/tmp/shot.jpg"));
    }

    #[tokio::test]
    async fn zero_area_region_is_rejected() {
        let settings = CaptureSettings {
            region: CaptureRegion {
                top: 0,
                left: 0,
                width: 0,
                height: 600,
            },
            ..CaptureSettings::default()
        };
        let capture = ScreenCapture::new(&settings);

        let err = capture.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));
    }
}
