use super::error::PdTypeError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// The family of electronics a photon detector is read out with.
///
/// Each kind has its own digitization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Pmt,
    Arapuca,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pmt => "pmt",
            Self::Arapuca => "arapuca",
        }
    }
}

/// Photon detector type of a single channel, as written in the channel map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdType {
    PmtCoated,
    PmtUncoated,
    XarapucaVuv,
    XarapucaVis,
    ArapucaVuv,
    ArapucaVis,
}

impl PdType {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::PmtCoated | Self::PmtUncoated => DeviceKind::Pmt,
            Self::XarapucaVuv | Self::XarapucaVis | Self::ArapucaVuv | Self::ArapucaVis => {
                DeviceKind::Arapuca
            }
        }
    }

    /// Coated PMTs and VUV (x)arapucas see the direct scintillation light
    pub fn is_vuv_sensitive(&self) -> bool {
        matches!(
            self,
            Self::PmtCoated | Self::XarapucaVuv | Self::ArapucaVuv
        )
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::PmtCoated => "pmt_coated",
            Self::PmtUncoated => "pmt_uncoated",
            Self::XarapucaVuv => "xarapuca_vuv",
            Self::XarapucaVis => "xarapuca_vis",
            Self::ArapucaVuv => "arapuca_vuv",
            Self::ArapucaVis => "arapuca_vis",
        }
    }
}

impl FromStr for PdType {
    type Err = PdTypeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pmt_coated" => Ok(Self::PmtCoated),
            "pmt_uncoated" => Ok(Self::PmtUncoated),
            "xarapuca_vuv" => Ok(Self::XarapucaVuv),
            "xarapuca_vis" => Ok(Self::XarapucaVis),
            "arapuca_vuv" => Ok(Self::ArapucaVuv),
            "arapuca_vis" => Ok(Self::ArapucaVis),
            other => Err(PdTypeError::InvalidKeyword(other.to_string())),
        }
    }
}

impl Display for PdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword())
    }
}
