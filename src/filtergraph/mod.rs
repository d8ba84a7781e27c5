//! Filter-graph compiler.
//!
//! Turns a validated layout plus resolved stream URLs into the complete
//! argument vector for the encoder child: global flags, per-input blocks,
//! one `-filter_complex` graph producing `[v]` and `[a]`, the selected
//! profile's encode arguments, and an MPEG-TS stream on stdout.
//!
//! Compilation is pure and deterministic: the same request yields a
//! byte-identical vector on every call.

use crate::encoder::EncoderProfile;
use crate::error::{Error, Result};
use crate::layout::{CustomSlot, LayoutConfig, LayoutKind, FRAME_HEIGHT, FRAME_WIDTH, MAX_STREAMS};

/// Output frame rate every input is resampled to.
const FPS: u32 = 30;

/// pip: inset bounding box, border thickness, and frame-edge margin.
const PIP_INSET_W: u32 = 640;
const PIP_INSET_H: u32 = 360;
const PIP_BORDER: u32 = 8;
const PIP_MARGIN: u32 = 40;

/// multi_pip: inset bounding box, border, inter-inset gap, frame-edge margin.
const MULTI_INSET_W: u32 = 384;
const MULTI_INSET_H: u32 = 216;
const MULTI_BORDER: u32 = 4;
const MULTI_GAP: u32 = 20;
const MULTI_MARGIN: u32 = 40;

/// dvd_pip: inset bounding box and bounce speed in pixels per second.
const DVD_INSET_W: u32 = 480;
const DVD_INSET_H: u32 = 270;
const DVD_SPEED_X: u32 = 120;
const DVD_SPEED_Y: u32 = 80;

/// custom: border thickness when a slot requests one.
const CUSTOM_BORDER: u32 = 4;

/// One input stream in canonical slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSource {
    pub slot: String,
    pub url: String,
    /// Mix volume, already clamped to `[0, 1]`.
    pub volume: f64,
}

/// A fully resolved compilation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileRequest {
    pub kind: LayoutKind,
    /// Sources in canonical slot order (area-descending for custom).
    pub sources: Vec<StreamSource>,
    /// Index of the audio slot within `sources`.
    pub audio_index: usize,
    /// Parallel to `sources` when `kind` is custom, empty otherwise.
    pub custom_slots: Vec<CustomSlot>,
}

impl CompileRequest {
    /// Validate a layout and resolve its channel ids to stream URLs.
    ///
    /// `resolve` maps a channel id to its stream URL; an unknown id is a
    /// layout error, reported synchronously without touching any child.
    pub fn from_layout<F>(layout: &LayoutConfig, resolve: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        layout.validate()?;

        let ordered = layout.ordered_slots();
        let mut sources = Vec::with_capacity(ordered.len());
        for slot in &ordered {
            let channel_id = &layout.streams[slot];
            let url = resolve(channel_id)
                .ok_or_else(|| Error::bad_layout(format!("unknown channel id: {channel_id}")))?;
            sources.push(StreamSource {
                slot: slot.clone(),
                url,
                volume: layout.volume_for(slot),
            });
        }

        let audio_index = ordered
            .iter()
            .position(|s| *s == layout.audio_source)
            .ok_or_else(|| {
                Error::bad_layout(format!(
                    "audio source {} is not an assigned slot",
                    layout.audio_source
                ))
            })?;

        let custom_slots = match layout.kind {
            LayoutKind::Custom => layout
                .sorted_custom_slots()
                .into_iter()
                .cloned()
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            kind: layout.kind,
            sources,
            audio_index,
            custom_slots,
        })
    }
}

/// Per-deployment knobs that flow into the argument vector.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions<'a> {
    /// ffmpeg binary, becomes argv[0].
    pub ffmpeg: &'a str,
    pub user_agent: &'a str,
    /// Extra upstream headers, `\n`-separated as configured.
    pub source_headers: Option<&'a str>,
}

/// Compile the complete child argument vector.
pub fn compile(
    req: &CompileRequest,
    profile: &EncoderProfile,
    opts: &EncodeOptions,
) -> Result<Vec<String>> {
    if req.sources.is_empty() {
        return Err(Error::bad_layout("layout has no assigned streams"));
    }
    if req.sources.len() > MAX_STREAMS {
        return Err(Error::bad_layout(format!(
            "at most {MAX_STREAMS} streams are supported, got {}",
            req.sources.len()
        )));
    }
    if req.audio_index >= req.sources.len() {
        return Err(Error::bad_layout("audio index out of range"));
    }
    if req.kind == LayoutKind::Custom && req.custom_slots.len() != req.sources.len() {
        return Err(Error::bad_layout(
            "custom slot list does not match assigned streams",
        ));
    }

    let mut args: Vec<String> = vec![
        opts.ffmpeg.to_string(),
        "-loglevel".into(),
        "warning".into(),
        "-hide_banner".into(),
        "-nostdin".into(),
    ];
    args.extend(profile.pre_input_args.iter().map(|s| s.to_string()));

    for src in &req.sources {
        args.push("-thread_queue_size".into());
        args.push("1024".into());
        args.push("-user_agent".into());
        args.push(opts.user_agent.to_string());
        if let Some(headers) = opts.source_headers {
            if !headers.trim().is_empty() {
                args.push("-headers".into());
                args.push(headers.replace("\\n", "\r\n"));
            }
        }
        args.extend(
            [
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_on_network_error",
                "1",
                "-rw_timeout",
                "15000000",
                "-timeout",
                "15000000",
                "-i",
            ]
            .map(String::from),
        );
        args.push(src.url.clone());
    }

    args.push("-filter_complex".into());
    args.push(build_filter_graph(req, profile)?);

    args.extend(["-map", "[v]", "-map", "[a]"].map(String::from));
    args.extend(profile.output_args.iter().map(|s| s.to_string()));
    args.extend(["-c:a", "aac", "-b:a", "128k", "-ar", "48000", "-ac", "2"].map(String::from));
    args.extend(["-fflags", "+genpts", "-flags", "low_delay"].map(String::from));
    args.extend(["-f", "mpegts", "pipe:1"].map(String::from));

    Ok(args)
}

/// Build the combined video + audio filter graph.
fn build_filter_graph(req: &CompileRequest, profile: &EncoderProfile) -> Result<String> {
    // With a hardware upload stage the composed frame gets an intermediate
    // label and one extra chain at the end.
    let video_out = if profile.supports_hw_filter { "[vsw]" } else { "[v]" };

    let mut chains = match req.kind {
        LayoutKind::Pip => pip_chains(video_out),
        LayoutKind::SplitH => canvas_chains(&[(0, 0, 960, 1080), (960, 0, 960, 1080)], video_out),
        LayoutKind::SplitV => canvas_chains(&[(0, 0, 1920, 540), (0, 540, 1920, 540)], video_out),
        LayoutKind::Grid2x2 => canvas_chains(
            &[
                (0, 0, 960, 540),
                (960, 0, 960, 540),
                (0, 540, 960, 540),
                (960, 540, 960, 540),
            ],
            video_out,
        ),
        LayoutKind::MultiPip2 => multi_pip_chains(2, video_out),
        LayoutKind::MultiPip3 => multi_pip_chains(3, video_out),
        LayoutKind::MultiPip4 => multi_pip_chains(4, video_out),
        LayoutKind::DvdPip => dvd_pip_chains(video_out),
        LayoutKind::Custom => custom_chains(&req.custom_slots, video_out),
    };

    if profile.supports_hw_filter {
        chains.push(format!("{video_out}format=nv12,hwupload[v]"));
    }

    chains.extend(audio_chains(req));

    Ok(chains.join(";"))
}

/// Normalize input `idx` into a `w`x`h` box: resample to 30 fps, scale
/// preserving aspect, letterbox with black, square pixels.
fn fit(idx: usize, w: u32, h: u32) -> String {
    format!(
        "[{idx}:v]fps={FPS},scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1"
    )
}

/// [`fit`] plus a white border of thickness `b` on all sides.
fn bordered(idx: usize, w: u32, h: u32, b: u32) -> String {
    format!(
        "{},pad={}:{}:{b}:{b}:color=white",
        fit(idx, w, h),
        w + 2 * b,
        h + 2 * b
    )
}

/// A black 1920x1080 canvas source labelled `[bg]`.
fn black_canvas() -> String {
    format!("color=c=black:s={FRAME_WIDTH}x{FRAME_HEIGHT}:r={FPS}[bg]")
}

fn pip_chains(out: &str) -> Vec<String> {
    let inset_w = PIP_INSET_W + 2 * PIP_BORDER;
    let inset_h = PIP_INSET_H + 2 * PIP_BORDER;
    let x = FRAME_WIDTH - inset_w - PIP_MARGIN;
    let y = FRAME_HEIGHT - inset_h - PIP_MARGIN;
    vec![
        format!("{}[base]", fit(0, FRAME_WIDTH, FRAME_HEIGHT)),
        format!("{}[inset]", bordered(1, PIP_INSET_W, PIP_INSET_H, PIP_BORDER)),
        format!("[base][inset]overlay={x}:{y}{out}"),
    ]
}

/// Tile inputs onto a black canvas at fixed positions (splits and the grid).
fn canvas_chains(tiles: &[(u32, u32, u32, u32)], out: &str) -> Vec<String> {
    let mut chains = vec![black_canvas()];
    for (i, (_, _, w, h)) in tiles.iter().enumerate() {
        chains.push(format!("{}[p{i}]", fit(i, *w, *h)));
    }
    let mut prev = "[bg]".to_string();
    for (i, (x, y, _, _)) in tiles.iter().enumerate() {
        let label = if i + 1 == tiles.len() {
            out.to_string()
        } else {
            format!("[c{i}]")
        };
        chains.push(format!("{prev}[p{i}]overlay={x}:{y}{label}"));
        prev = label;
    }
    chains
}

fn multi_pip_chains(insets: usize, out: &str) -> Vec<String> {
    let inset_w = MULTI_INSET_W + 2 * MULTI_BORDER;
    let inset_h = MULTI_INSET_H + 2 * MULTI_BORDER;
    let y = FRAME_HEIGHT - MULTI_MARGIN - inset_h;

    let mut chains = vec![format!("{}[base]", fit(0, FRAME_WIDTH, FRAME_HEIGHT))];
    for i in 1..=insets {
        chains.push(format!(
            "{}[ins{i}]",
            bordered(i, MULTI_INSET_W, MULTI_INSET_H, MULTI_BORDER)
        ));
    }

    let mut prev = "[base]".to_string();
    for i in 1..=insets {
        // inset1 sits rightmost, later insets march left.
        let x = FRAME_WIDTH - MULTI_MARGIN - inset_w - (i as u32 - 1) * (inset_w + MULTI_GAP);
        let label = if i == insets {
            out.to_string()
        } else {
            format!("[c{i}]")
        };
        chains.push(format!("{prev}[ins{i}]overlay={x}:{y}{label}"));
        prev = label;
    }
    chains
}

fn dvd_pip_chains(out: &str) -> Vec<String> {
    // Triangle-wave bounce: position reflects off the frame edges at a
    // constant speed, deterministic in t.
    let span_x = FRAME_WIDTH - DVD_INSET_W;
    let span_y = FRAME_HEIGHT - DVD_INSET_H;
    vec![
        format!("{}[base]", fit(0, FRAME_WIDTH, FRAME_HEIGHT)),
        format!("{}[inset]", fit(1, DVD_INSET_W, DVD_INSET_H)),
        format!(
            "[base][inset]overlay=x=abs(mod(t*{DVD_SPEED_X}\\,{})-{span_x}):\
             y=abs(mod(t*{DVD_SPEED_Y}\\,{})-{span_y}){out}",
            2 * span_x,
            2 * span_y
        ),
    ]
}

fn custom_chains(slots: &[CustomSlot], out: &str) -> Vec<String> {
    let mut chains = vec![black_canvas()];
    for (i, slot) in slots.iter().enumerate() {
        let mut chain = fit(i, slot.width, slot.height);
        if slot.border {
            chain.push_str(&format!(
                ",pad={}:{}:{CUSTOM_BORDER}:{CUSTOM_BORDER}:color=white",
                slot.width + 2 * CUSTOM_BORDER,
                slot.height + 2 * CUSTOM_BORDER
            ));
        }
        chains.push(format!("{chain}[s{i}]"));
    }
    let mut prev = "[bg]".to_string();
    for (i, slot) in slots.iter().enumerate() {
        let label = if i + 1 == slots.len() {
            out.to_string()
        } else {
            format!("[c{i}]")
        };
        chains.push(format!("{prev}[s{i}]overlay={}:{}{label}", slot.x, slot.y));
        prev = label;
    }
    chains
}

/// Resample every contributing input to 48 kHz stereo with async PTS
/// compensation, scale by its volume, and produce `[a]`.
///
/// Zero-volume slots get in-graph silent sources instead of decoding input
/// audio. A single non-zero slot that is also the audio slot bypasses the
/// mixer entirely.
fn audio_chains(req: &CompileRequest) -> Vec<String> {
    let n = req.sources.len();
    let nonzero: Vec<usize> = (0..n).filter(|&i| req.sources[i].volume > 0.0).collect();

    if nonzero.len() == 1 && nonzero[0] == req.audio_index {
        let i = req.audio_index;
        return vec![format!(
            "{}[a]",
            resampled(i, req.sources[i].volume)
        )];
    }

    let mut chains = Vec::with_capacity(n + 1);
    let mut labels = String::new();
    for (i, src) in req.sources.iter().enumerate() {
        if src.volume > 0.0 {
            chains.push(format!("{}[a{i}]", resampled(i, src.volume)));
        } else {
            chains.push(format!(
                "anullsrc=channel_layout=stereo:sample_rate=48000[a{i}]"
            ));
        }
        labels.push_str(&format!("[a{i}]"));
    }
    chains.push(format!("{labels}amix=inputs={n}:normalize=0[a]"));
    chains
}

fn resampled(idx: usize, volume: f64) -> String {
    format!(
        "[{idx}:a]aresample=async=1:first_pts=0,\
         aformat=sample_rates=48000:channel_layouts=stereo,volume={volume}"
    )
}
