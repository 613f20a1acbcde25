use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How export names are compared when an importer looks them up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "name_matching")]
pub enum NameMatching {
    /// `Hero` and `hero` name the same export. Matches the flash player.
    #[default]
    #[serde(rename = "case_insensitive")]
    CaseInsensitive,

    /// Names must match byte for byte.
    #[serde(rename = "exact")]
    Exact,
}

/// Polling policy used while waiting for another stream to export a name.
///
/// The timeout counts polls without frame progress, not wall-clock time, so a
/// slow but live producer is never given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolvePolicy {
    pub poll_interval_ms: u64,
    pub timeout_polls: u32,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        // 0.1 秒轮询一次，两秒无进度则放弃
        Self {
            poll_interval_ms: 100,
            timeout_polls: 20,
        }
    }
}

impl ResolvePolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wall-clock length of one full no-progress timeout.
    pub fn timeout(&self) -> Duration {
        self.poll_interval() * self.timeout_polls
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub resolve: ResolvePolicy,
    pub export_names: NameMatching,
    /// Prefix of the loader thread names, followed by the movie url.
    pub thread_name_prefix: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            resolve: ResolvePolicy::default(),
            export_names: NameMatching::default(),
            thread_name_prefix: String::from("swf-loader"),
        }
    }
}

impl LoaderConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub(crate) fn thread_name(&self, url: &str) -> String {
        // 线程名不能包含 NUL
        format!("{}:{}", self.thread_name_prefix, url).replace('\0', "")
    }
}
