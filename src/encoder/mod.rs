//! Encoder profile table and the startup probe that selects one.
//!
//! Profiles are tried in declared priority order; each candidate runs a short
//! test encode of a synthetic source and the first that exits cleanly wins.
//! The software profile always works as the fallback of last resort.

use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use utoipa::ToSchema;

/// How long a single probe invocation may run before it is abandoned.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Hardware,
    Software,
}

/// A named bundle of codec arguments, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderProfile {
    pub name: &'static str,
    pub kind: EncoderKind,
    pub codec: &'static str,
    /// Arguments inserted before the first `-i`.
    pub pre_input_args: &'static [&'static str],
    /// Video encode arguments inserted after the stream maps.
    pub output_args: &'static [&'static str],
    /// Whether the video filter chain must end in `format=nv12,hwupload`.
    pub supports_hw_filter: bool,
}

/// Fixed-priority candidate table. Hardware profiles first, software last.
pub const PROFILES: &[EncoderProfile] = &[
    EncoderProfile {
        name: "nvenc",
        kind: EncoderKind::Hardware,
        codec: "h264_nvenc",
        pre_input_args: &[],
        output_args: &[
            "-c:v",
            "h264_nvenc",
            "-preset",
            "p5",
            "-rc",
            "vbr",
            "-b:v",
            "6000k",
            "-maxrate",
            "6500k",
            "-bufsize",
            "12M",
            "-spatial_aq",
            "1",
            "-aq-strength",
            "8",
            "-pix_fmt",
            "yuv420p",
            "-r",
            "30",
            "-g",
            "60",
        ],
        supports_hw_filter: false,
    },
    EncoderProfile {
        name: "qsv",
        kind: EncoderKind::Hardware,
        codec: "h264_qsv",
        pre_input_args: &[],
        output_args: &[
            "-c:v",
            "h264_qsv",
            "-preset",
            "medium",
            "-b:v",
            "6000k",
            "-maxrate",
            "6500k",
            "-bufsize",
            "12M",
            "-r",
            "30",
            "-g",
            "60",
        ],
        supports_hw_filter: false,
    },
    EncoderProfile {
        name: "vaapi",
        kind: EncoderKind::Hardware,
        codec: "h264_vaapi",
        pre_input_args: &["-vaapi_device", "/dev/dri/renderD128"],
        output_args: &[
            "-c:v",
            "h264_vaapi",
            "-b:v",
            "6000k",
            "-maxrate",
            "6500k",
            "-bufsize",
            "12M",
            "-r",
            "30",
            "-g",
            "60",
        ],
        supports_hw_filter: true,
    },
    EncoderProfile {
        name: "cpu",
        kind: EncoderKind::Software,
        codec: "libx264",
        pre_input_args: &[],
        output_args: &[
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-tune",
            "zerolatency",
            "-b:v",
            "6000k",
            "-maxrate",
            "6500k",
            "-bufsize",
            "12M",
            "-pix_fmt",
            "yuv420p",
            "-r",
            "30",
            "-g",
            "60",
        ],
        supports_hw_filter: false,
    },
];

/// The software fallback profile.
pub fn software() -> &'static EncoderProfile {
    PROFILES
        .iter()
        .find(|p| p.kind == EncoderKind::Software)
        .expect("profile table always carries a software entry")
}

/// Look up a profile by name.
pub fn find_profile(name: &str) -> Option<&'static EncoderProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

/// Candidate list honoring the operator preference.
///
/// `auto` probes the whole table in priority order, `cpu` goes straight to
/// software, and a profile name probes that profile with software as the
/// fallback. An unrecognized name logs a warning and behaves like `auto`.
pub fn candidates(preference: &str) -> Vec<&'static EncoderProfile> {
    match preference {
        "auto" => PROFILES.iter().collect(),
        "cpu" => vec![software()],
        name => match find_profile(name) {
            Some(profile) if profile.kind == EncoderKind::Software => vec![profile],
            Some(profile) => vec![profile, software()],
            None => {
                tracing::warn!(preference = name, "Unknown encoder preference, probing all");
                PROFILES.iter().collect()
            }
        },
    }
}

/// Probe candidates in order and return the first working profile.
///
/// Falls back to software even if its own probe fails, so the service can
/// start and report encoder errors per-apply instead of dying at boot.
pub async fn select_profile(ffmpeg: &str, preference: &str) -> &'static EncoderProfile {
    for profile in candidates(preference) {
        if profile.kind == EncoderKind::Software {
            // Software needs no capability check.
            tracing::info!(profile = profile.name, codec = profile.codec, "Encoder selected");
            return profile;
        }
        tracing::debug!(profile = profile.name, "Probing encoder");
        if test_encode(ffmpeg, profile).await {
            tracing::info!(profile = profile.name, codec = profile.codec, "Encoder selected");
            return profile;
        }
        tracing::debug!(profile = profile.name, "Encoder probe failed");
    }

    tracing::warn!("No encoder candidate probed successfully, falling back to software");
    software()
}

/// Run a short synthetic encode with the profile's arguments.
async fn test_encode(ffmpeg: &str, profile: &EncoderProfile) -> bool {
    let mut command = Command::new(ffmpeg);
    command
        .arg("-hide_banner")
        .args(["-loglevel", "error"])
        .args(profile.pre_input_args)
        .args(["-f", "lavfi", "-i", "color=c=black:s=1920x1080:r=30"])
        .args(["-frames:v", "30"]);
    if profile.supports_hw_filter {
        command.args(["-vf", "format=nv12,hwupload"]);
    }
    command
        .args(profile.output_args)
        .args(["-an", "-f", "null", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to spawn encoder probe");
            return false;
        }
    };

    match tokio::time::timeout(PROBE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => {
            let _ = child.kill().await;
            false
        }
    }
}

/// Availability info for an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
}

/// Check that the external tools the service shells out to are present.
pub fn check_tools(ffmpeg: &str) -> Vec<ToolInfo> {
    [("ffmpeg", ffmpeg), ("ffprobe", "ffprobe")]
        .into_iter()
        .map(|(name, bin)| {
            let output = std::process::Command::new(bin).arg("-version").output();
            match output {
                Ok(out) if out.status.success() => ToolInfo {
                    name,
                    available: true,
                    version: String::from_utf8_lossy(&out.stdout)
                        .lines()
                        .next()
                        .map(|l| l.to_string()),
                },
                _ => ToolInfo {
                    name,
                    available: false,
                    version: None,
                },
            }
        })
        .collect()
}
