//! Managed publishing accounts.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::ids::string_id;
use crate::render_job::GeneratorAccountId;

string_id!(
    /// Unique identifier for a managed account.
    AccountId
);

/// A publishing identity that receives one scheduled video per local day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    /// Theme slug the account publishes under (e.g. "roblox")
    #[serde(default)]
    pub theme_slug: String,
    /// Mapping to the generation service's account, once resolved
    #[serde(default)]
    pub generator_account_id: Option<GeneratorAccountId>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Preferred local publish time; the configured default applies when unset
    #[serde(default, rename = "upload_time_1")]
    pub publish_time: Option<NaiveTime>,
}

fn default_active() -> bool {
    true
}

impl Account {
    /// The local wall-clock time this account publishes at.
    pub fn publish_time_or(&self, default: NaiveTime) -> NaiveTime {
        self.publish_time.unwrap_or(default)
    }

    /// Name used when creating the matching generator account.
    pub fn generator_name(&self) -> &str {
        if self.display_name.trim().is_empty() {
            "Cadence Account"
        } else {
            &self.display_name
        }
    }
}
