//! Layout model: the closed set of composition kinds, slot naming, custom
//! slot geometry, and the validation rules a layout must pass before it is
//! compiled into an encoder command.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use utoipa::ToSchema;

/// Width of the composed output frame.
pub const FRAME_WIDTH: u32 = 1920;
/// Height of the composed output frame.
pub const FRAME_HEIGHT: u32 = 1080;
/// Hard cap on simultaneous input streams.
pub const MAX_STREAMS: usize = 5;

/// Smallest allowed custom slot, 1/6th of the frame.
pub const MIN_SLOT_WIDTH: u32 = 320;
pub const MIN_SLOT_HEIGHT: u32 = 180;

/// The closed set of supported arrangements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Pip,
    SplitH,
    SplitV,
    #[serde(rename = "grid_2x2")]
    Grid2x2,
    #[serde(rename = "multi_pip_2")]
    MultiPip2,
    #[serde(rename = "multi_pip_3")]
    MultiPip3,
    #[serde(rename = "multi_pip_4")]
    MultiPip4,
    DvdPip,
    Custom,
}

impl LayoutKind {
    /// Canonical ordered slot names for this kind. Empty for `Custom`, whose
    /// slots come from the request itself.
    pub fn slot_names(&self) -> &'static [&'static str] {
        match self {
            LayoutKind::Pip | LayoutKind::DvdPip => &["main", "inset"],
            LayoutKind::SplitH => &["left", "right"],
            LayoutKind::SplitV => &["top", "bottom"],
            LayoutKind::Grid2x2 => &["slot1", "slot2", "slot3", "slot4"],
            LayoutKind::MultiPip2 => &["main", "inset1", "inset2"],
            LayoutKind::MultiPip3 => &["main", "inset1", "inset2", "inset3"],
            LayoutKind::MultiPip4 => &["main", "inset1", "inset2", "inset3", "inset4"],
            LayoutKind::Custom => &[],
        }
    }

    /// The wire tag, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutKind::Pip => "pip",
            LayoutKind::SplitH => "split_h",
            LayoutKind::SplitV => "split_v",
            LayoutKind::Grid2x2 => "grid_2x2",
            LayoutKind::MultiPip2 => "multi_pip_2",
            LayoutKind::MultiPip3 => "multi_pip_3",
            LayoutKind::MultiPip4 => "multi_pip_4",
            LayoutKind::DvdPip => "dvd_pip",
            LayoutKind::Custom => "custom",
        }
    }
}

/// A free-form rectangular slot within the 1920x1080 frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomSlot {
    pub id: String,
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub border: bool,
}

impl CustomSlot {
    /// Pixel area, used for the largest-first z-ordering.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Check bounds and the 16:9 aspect constraint.
    pub fn validate(&self) -> Result<()> {
        if self.width < MIN_SLOT_WIDTH || self.width > FRAME_WIDTH {
            return Err(Error::bad_geometry(format!(
                "slot {}: width {} outside {}..={}",
                self.name, self.width, MIN_SLOT_WIDTH, FRAME_WIDTH
            )));
        }
        if self.height < MIN_SLOT_HEIGHT || self.height > FRAME_HEIGHT {
            return Err(Error::bad_geometry(format!(
                "slot {}: height {} outside {}..={}",
                self.name, self.height, MIN_SLOT_HEIGHT, FRAME_HEIGHT
            )));
        }
        if self.x + self.width > FRAME_WIDTH {
            return Err(Error::bad_geometry(format!(
                "slot {}: x {} + width {} exceeds frame width {}",
                self.name, self.x, self.width, FRAME_WIDTH
            )));
        }
        if self.y + self.height > FRAME_HEIGHT {
            return Err(Error::bad_geometry(format!(
                "slot {}: y {} + height {} exceeds frame height {}",
                self.name, self.y, self.height, FRAME_HEIGHT
            )));
        }

        // Aspect must stay within 1% of 16:9.
        let target = 16.0 / 9.0;
        let ratio = f64::from(self.width) / f64::from(self.height);
        if ((ratio - target) / target).abs() > 0.01 {
            return Err(Error::bad_geometry(format!(
                "slot {}: {}x{} deviates more than 1% from 16:9",
                self.name, self.width, self.height
            )));
        }

        Ok(())
    }
}

/// A complete layout request: which channel fills which slot, where the audio
/// comes from, and per-slot mix volumes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LayoutConfig {
    #[serde(rename = "layout")]
    pub kind: LayoutKind,

    /// Slot name to channel id.
    pub streams: BTreeMap<String, String>,

    /// The slot whose audio is selected (or mixed loudest by default).
    pub audio_source: String,

    /// Per-slot mix volume in `[0, 1]`. Slots absent here default to 1.0 for
    /// the audio source and 0.0 otherwise.
    #[serde(default)]
    pub volumes: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_slots: Option<Vec<CustomSlot>>,
}

impl LayoutConfig {
    /// Validate slot assignments against the kind's slot list (or the custom
    /// geometry), the audio source, and the stream cap.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            LayoutKind::Custom => {
                let slots = self
                    .custom_slots
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| Error::bad_layout("custom layout requires custom_slots"))?;

                if slots.len() > MAX_STREAMS {
                    return Err(Error::bad_layout(format!(
                        "custom layout supports at most {MAX_STREAMS} slots, got {}",
                        slots.len()
                    )));
                }

                let mut names = HashSet::new();
                for slot in slots {
                    slot.validate()?;
                    if !names.insert(slot.name.as_str()) {
                        return Err(Error::bad_layout(format!(
                            "duplicate custom slot name: {}",
                            slot.name
                        )));
                    }
                    if !self.streams.contains_key(&slot.name) {
                        return Err(Error::bad_layout(format!(
                            "slot {} has no channel assigned",
                            slot.name
                        )));
                    }
                }
                for assigned in self.streams.keys() {
                    if !names.contains(assigned.as_str()) {
                        return Err(Error::bad_layout(format!(
                            "slot {assigned} is not defined in custom_slots"
                        )));
                    }
                }
            }
            kind => {
                if self.custom_slots.as_ref().is_some_and(|s| !s.is_empty()) {
                    return Err(Error::bad_layout(
                        "custom_slots are only valid for the custom layout",
                    ));
                }
                let required = kind.slot_names();
                for name in required {
                    if !self.streams.contains_key(*name) {
                        return Err(Error::bad_layout(format!(
                            "slot {name} has no channel assigned"
                        )));
                    }
                }
                for assigned in self.streams.keys() {
                    if !required.contains(&assigned.as_str()) {
                        return Err(Error::bad_layout(format!(
                            "slot {assigned} is not part of layout {}",
                            kind.as_str()
                        )));
                    }
                }
            }
        }

        if !self.streams.contains_key(&self.audio_source) {
            return Err(Error::bad_layout(format!(
                "audio source {} is not an assigned slot",
                self.audio_source
            )));
        }
        if self.streams.len() > MAX_STREAMS {
            return Err(Error::bad_layout(format!(
                "at most {MAX_STREAMS} streams are supported, got {}",
                self.streams.len()
            )));
        }

        Ok(())
    }

    /// Slot names in compilation order: the canonical list for fixed kinds,
    /// area-descending for custom (ties keep request order).
    pub fn ordered_slots(&self) -> Vec<String> {
        match self.kind {
            LayoutKind::Custom => self
                .sorted_custom_slots()
                .into_iter()
                .map(|s| s.name.clone())
                .collect(),
            kind => kind.slot_names().iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Custom slots sorted largest-first, the rendering (bottom-of-stack
    /// first) order.
    pub fn sorted_custom_slots(&self) -> Vec<&CustomSlot> {
        let mut slots: Vec<&CustomSlot> = self.custom_slots.as_deref().unwrap_or(&[]).iter().collect();
        slots.sort_by(|a, b| b.area().cmp(&a.area()));
        slots
    }

    /// Effective volume for a slot, clamped to `[0, 1]`.
    pub fn volume_for(&self, slot: &str) -> f64 {
        match self.volumes.get(slot) {
            Some(v) => v.clamp(0.0, 1.0),
            None if slot == self.audio_source => 1.0,
            None => 0.0,
        }
    }

    /// Clamp all stored volumes to `[0, 1]` in place.
    pub fn clamp_volumes(&mut self) {
        for v in self.volumes.values_mut() {
            *v = v.clamp(0.0, 1.0);
        }
    }
}
