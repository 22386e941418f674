use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

/// Ambient sounds offered while focusing. `None` means silence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum AmbientSound {
    #[default]
    None,
    WhiteNoise,
    Birds,
    NightForest,
    Rain,
}

impl AmbientSound {
    pub const ALL: [AmbientSound; 5] = [
        AmbientSound::None,
        AmbientSound::WhiteNoise,
        AmbientSound::Birds,
        AmbientSound::NightForest,
        AmbientSound::Rain,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            AmbientSound::None => "none",
            AmbientSound::WhiteNoise => "whiteNoise",
            AmbientSound::Birds => "birds",
            AmbientSound::NightForest => "nightForest",
            AmbientSound::Rain => "rain",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AmbientSound::None => "No sound",
            AmbientSound::WhiteNoise => "White noise",
            AmbientSound::Birds => "Birds",
            AmbientSound::NightForest => "Night forest",
            AmbientSound::Rain => "Rain",
        }
    }

    /// Asset stem under the sounds directory (`<stem>.mp3`).
    pub fn file_name(&self) -> Option<&'static str> {
        match self {
            AmbientSound::None => None,
            AmbientSound::WhiteNoise => Some("white_noise"),
            AmbientSound::Birds => Some("birds"),
            AmbientSound::NightForest => Some("night_forest"),
            AmbientSound::Rain => Some("rain"),
        }
    }

    pub fn is_silent(&self) -> bool {
        *self == AmbientSound::None
    }
}

impl fmt::Display for AmbientSound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AmbientSound {
    type Err = Error;

    /// Accepts the camelCase id or the asset stem, case-insensitively.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        AmbientSound::ALL
            .into_iter()
            .find(|sound| {
                sound.id().to_ascii_lowercase() == wanted
                    || sound.file_name().map(|stem| stem == wanted).unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("unknown ambient sound '{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_and_stems() {
        assert_eq!("rain".parse::<AmbientSound>().unwrap(), AmbientSound::Rain);
        assert_eq!(
            "nightForest".parse::<AmbientSound>().unwrap(),
            AmbientSound::NightForest
        );
        assert_eq!(
            "white_noise".parse::<AmbientSound>().unwrap(),
            AmbientSound::WhiteNoise
        );
        assert_eq!("NONE".parse::<AmbientSound>().unwrap(), AmbientSound::None);
        assert!("thunder".parse::<AmbientSound>().is_err());
    }

    #[test]
    fn only_none_has_no_asset() {
        for sound in AmbientSound::ALL {
            assert_eq!(sound.file_name().is_none(), sound.is_silent());
        }
    }
}
