//! Tone selection and prompt construction.
//!
//! A tone is a point on a 2D grid: `formal` runs left to right from casual to
//! formal, `friendly` runs bottom to top from direct to warm. Both axes live
//! in `[0, 1]` and are snapped to two decimals before anything reads them.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TEXT: &str = "Type your text here...";

/// Prompt qualifier thresholds.
const LOW: f64 = 0.33;
const HIGH: f64 = 0.66;

/// Display label thresholds, slightly wider than the prompt ones.
const LABEL_LOW: f64 = 0.35;
const LABEL_HIGH: f64 = 0.65;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ToneAxes {
    pub formal: f64,
    pub friendly: f64,
}

impl Default for ToneAxes {
    fn default() -> Self {
        Self {
            formal: 0.6,
            friendly: 0.5,
        }
    }
}

impl ToneAxes {
    /// Build axes from raw values, clamping and snapping each one.
    pub fn new(formal: f64, friendly: f64) -> Self {
        Self {
            formal: snap(clamp01(formal)),
            friendly: snap(clamp01(friendly)),
        }
    }

    /// Map a pointer position on the grid to axes.
    ///
    /// `x` and `y` are fractions of the grid box measured from its top-left
    /// corner, so friendliness grows as the pointer moves up.
    pub fn from_grid(x: f64, y: f64) -> Self {
        Self::new(clamp01(x), 1.0 - clamp01(y))
    }

    pub fn normalized(self) -> Self {
        Self::new(self.formal, self.friendly)
    }

    pub fn formality(&self) -> Formality {
        let formal = self.normalized().formal;
        if formal < LOW {
            Formality::Casual
        } else if formal > HIGH {
            Formality::VeryFormal
        } else {
            Formality::NeutralProfessional
        }
    }

    pub fn warmth(&self) -> Warmth {
        let friendly = self.normalized().friendly;
        if friendly < LOW {
            Warmth::DirectAndConcise
        } else if friendly > HIGH {
            Warmth::WarmAndFriendly
        } else {
            Warmth::Balanced
        }
    }

    /// Short label for the current position, e.g. `Formal · Friendly`.
    pub fn label(&self) -> String {
        let axes = self.normalized();
        let formality = if axes.formal < LABEL_LOW {
            "Casual"
        } else if axes.formal > LABEL_HIGH {
            "Formal"
        } else {
            "Neutral"
        };
        let warmth = if axes.friendly < LABEL_LOW {
            "Direct"
        } else if axes.friendly > LABEL_HIGH {
            "Friendly"
        } else {
            "Balanced"
        };
        format!("{} · {}", formality, warmth)
    }
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn snap(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formality {
    Casual,
    NeutralProfessional,
    VeryFormal,
}

impl Formality {
    pub fn qualifier(self) -> &'static str {
        match self {
            Formality::Casual => "casual",
            Formality::NeutralProfessional => "neutral-professional",
            Formality::VeryFormal => "very formal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warmth {
    DirectAndConcise,
    Balanced,
    WarmAndFriendly,
}

impl Warmth {
    pub fn qualifier(self) -> &'static str {
        match self {
            Warmth::DirectAndConcise => "direct and concise",
            Warmth::Balanced => "balanced",
            Warmth::WarmAndFriendly => "warm and friendly",
        }
    }
}

/// What the caller asked for: a grid position, a free-form label, or nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum ToneSpec {
    Axes(ToneAxes),
    Label(String),
    Unspecified,
}

impl ToneSpec {
    /// Resolve loosely shaped request fields into a `ToneSpec`.
    ///
    /// Axes win only when both coordinates are present. A blank label is
    /// treated as missing.
    pub fn from_parts(formal: Option<f64>, friendly: Option<f64>, label: Option<&str>) -> Self {
        match (formal, friendly) {
            (Some(formal), Some(friendly)) => ToneSpec::Axes(ToneAxes::new(formal, friendly)),
            _ => match label.map(str::trim) {
                Some(label) if !label.is_empty() => ToneSpec::Label(label.to_string()),
                _ => ToneSpec::Unspecified,
            },
        }
    }
}

/// Build the instruction sent to the completion service.
pub fn build_prompt(text: &str, spec: &ToneSpec) -> String {
    match spec {
        ToneSpec::Axes(axes) => format!(
            "Rewrite the user text with the following tone:\n\
             - Formality: {}\n\
             - Warmth: {}\n\
             \n\
             Rules:\n\
             - Preserve meaning and key details.\n\
             - Keep similar length.\n\
             - Return ONLY the rewritten text.\n\
             \n\
             User text:\n\
             {}",
            axes.formality().qualifier(),
            axes.warmth().qualifier(),
            text
        ),
        ToneSpec::Label(label) => format!(
            "Rewrite the user text in a {} tone. Return only the rewritten text.\n\nUser text:\n{}",
            label, text
        ),
        ToneSpec::Unspecified => {
            warn!("Building a rewrite prompt without axes or tone label");
            format!("Rewrite the text preserving meaning:\n\n{}", text)
        }
    }
}

/// Quick-pick positions on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TonePreset {
    FormalWarm,
    CasualFriendly,
    FormalDirect,
    CasualDirect,
}

impl TonePreset {
    pub const ALL: [TonePreset; 4] = [
        TonePreset::FormalWarm,
        TonePreset::CasualFriendly,
        TonePreset::FormalDirect,
        TonePreset::CasualDirect,
    ];

    pub fn axes(self) -> ToneAxes {
        match self {
            TonePreset::FormalWarm => ToneAxes::new(0.9, 0.6),
            TonePreset::CasualFriendly => ToneAxes::new(0.1, 0.8),
            TonePreset::FormalDirect => ToneAxes::new(0.9, 0.1),
            TonePreset::CasualDirect => ToneAxes::new(0.1, 0.1),
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            TonePreset::FormalWarm => "formal-warm",
            TonePreset::CasualFriendly => "casual-friendly",
            TonePreset::FormalDirect => "formal-direct",
            TonePreset::CasualDirect => "casual-direct",
        }
    }
}

impl fmt::Display for TonePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match self {
            TonePreset::FormalWarm => "Formal · Warm",
            TonePreset::CasualFriendly => "Casual · Friendly",
            TonePreset::FormalDirect => "Formal · Direct",
            TonePreset::CasualDirect => "Casual · Direct",
        };
        f.write_str(title)
    }
}

impl FromStr for TonePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TonePreset::ALL
            .into_iter()
            .find(|preset| preset.id() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = TonePreset::ALL.iter().map(|p| p.id()).collect();
                format!("Unknown preset '{}', expected one of: {}", s, known.join(", "))
            })
    }
}
