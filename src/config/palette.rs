use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, VariantArray};

/// Cosmetic tag attached to every post. Only the banner cares about it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    VariantArray,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ColorTag {
    Rose,
    #[default]
    Amber,
    Mint,
    Sky,
    Lavender,
}

impl ColorTag {
    pub fn hex(self) -> &'static str {
        match self {
            ColorTag::Rose => "#f4a6b7",
            ColorTag::Amber => "#f6c667",
            ColorTag::Mint => "#9be3c4",
            ColorTag::Sky => "#8ecae6",
            ColorTag::Lavender => "#c3b1e1",
        }
    }

    /// SGR foreground code used by the terminal banner.
    pub fn ansi(self) -> u8 {
        match self {
            ColorTag::Rose => 31,
            ColorTag::Amber => 33,
            ColorTag::Mint => 32,
            ColorTag::Sky => 36,
            ColorTag::Lavender => 35,
        }
    }

    pub fn random() -> Self {
        Self::random_with(&mut rand::thread_rng())
    }

    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::VARIANTS.choose(rng).copied().unwrap_or_default()
    }

    /// Lenient parse for persisted values; unknown tags fall back to the default.
    pub fn from_stored(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return ColorTag::default();
        };
        raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(tag = raw, "unknown colour tag, using default");
            ColorTag::default()
        })
    }
}
