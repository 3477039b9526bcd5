//! Service and output mode enums
//!
//! Both enums persist as lowercase strings in the configuration document
//! and parse back from the same tags.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a service's content is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceType {
    /// Cloned from a git repository
    Git,
    /// Checked out from a subversion repository
    Svn,
    /// Adopted local directory; never fetched, never deleted
    Dir,
}

impl ServiceType {
    /// True for types fetched by a version-control tool.
    pub fn is_vcs(&self) -> bool {
        matches!(self, Self::Git | Self::Svn)
    }
}

/// Output mode for the transmission pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum OutputMode {
    /// Pipe the generator into the raspi-teletext output process
    #[default]
    #[serde(rename = "raspi-teletext")]
    #[strum(serialize = "raspi-teletext")]
    RaspiTeletext,
    /// Run the generator standalone with piped output disabled
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    None,
}
