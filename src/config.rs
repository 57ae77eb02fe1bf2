//! Configuration: an environment-derived [`Config`] for process-level knobs,
//! and a JSON-loaded [`ServiceConfig`] for everything that identifies which
//! manifest to ingest and where to put the result (spec.md §1 treats the
//! JSON loader as an external collaborator; this module is where it lands).

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Process-level configuration, required in production and defaulted in dev
/// the way the teacher's `Config::from_env` splits the two.
#[derive(Debug, Clone)]
pub struct Config {
    pub is_dev: bool,
    /// Path to the `ServiceConfig` JSON file.
    pub service_config_path: String,
    /// Polling floor for the orchestrator's manifest-refresh timer, seconds.
    pub min_update_period: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let service_config_path = if is_dev {
            env::var("SERVICE_CONFIG").unwrap_or_else(|_| "service.json".to_string())
        } else {
            env::var("SERVICE_CONFIG").map_err(|_| {
                EngineError::coded(
                    crate::error::Code::DashInvalidXml,
                    "SERVICE_CONFIG is required in production",
                )
            })?
        };

        let min_update_period = env::var("MIN_UPDATE_PERIOD_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3.0);

        Ok(Config {
            is_dev,
            service_config_path,
            min_update_period,
        })
    }
}

/// Ordered preference for audio-language selection (spec.md §4.12).
pub type LanguagePreferences = Vec<String>;

/// Which third of the bandwidth-sorted variant list to select from
/// (spec.md §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthTier {
    Low,
    Mid,
    High,
}

/// The per-ingest configuration an operator supplies as JSON: which
/// manifest to pull, which APIs resolve its URL and decryption keys, and
/// where the HLS output and scratch directories live.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// `{service}` template substitution for the manifest- and key-API URLs.
    pub service: String,
    /// `{id}` template substitution for the manifest- and key-API URLs.
    pub id: String,
    /// Manifest-URL API format string, e.g.
    /// `https://api.example.com/mpd/{service}/{id}`.
    pub apiformat_mpd: String,
    /// Decryption-key API format string, e.g.
    /// `https://api.example.com/key/{service}/{id}/{pssh-box}`.
    pub apiformat_key: String,
    pub languages: LanguagePreferences,
    pub bandwidth_tier: BandwidthTier,
    /// Rolling HLS window size, `N` in spec.md §4.11.
    pub max_segment_num: usize,
    /// HLS output directory (`master.m3u8`, `{audio,video}/*.m3u8`).
    pub outpath: String,
    /// Working-directory root for the saver's `download/`/`output/` scratch
    /// directories.
    pub repo_root: String,
    /// Path to the decrypter executable (spec.md §6's `decrypt.sh` contract).
    pub decrypter_path: String,
}

impl ServiceConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(EngineError::Io)?;
        serde_json::from_str(&raw).map_err(|e| {
            EngineError::coded(
                crate::error::Code::DashInvalidXml,
                format!("failed to parse {}: {e}", path.display()),
            )
        })
    }

    /// Fill `{service}`/`{id}` into the manifest-URL API format string.
    pub fn manifest_api_url(&self) -> String {
        self.apiformat_mpd
            .replace("{service}", &self.service)
            .replace("{id}", &self.id)
    }

    /// Fill `{service}`/`{id}`/`{pssh-box}` into the key API format string.
    pub fn key_api_url(&self, pssh_box_base64: &str) -> String {
        self.apiformat_key
            .replace("{service}", &self.service)
            .replace("{id}", &self.id)
            .replace("{pssh-box}", pssh_box_base64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_api_url_substitutes_templates() {
        let cfg = ServiceConfig {
            service: "svc".into(),
            id: "42".into(),
            apiformat_mpd: "https://api/{service}/{id}/mpd".into(),
            apiformat_key: "https://api/{service}/{id}/key/{pssh-box}".into(),
            languages: vec!["en".into()],
            bandwidth_tier: BandwidthTier::Mid,
            max_segment_num: 5,
            outpath: "/out".into(),
            repo_root: "/repo".into(),
            decrypter_path: "/bin/decrypt.sh".into(),
        };
        assert_eq!(cfg.manifest_api_url(), "https://api/svc/42/mpd");
        assert_eq!(
            cfg.key_api_url("QUJD"),
            "https://api/svc/42/key/QUJD"
        );
    }

    #[test]
    fn service_config_from_file_parses_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        std::fs::write(
            &path,
            r#"{
                "service": "svc",
                "id": "42",
                "apiformat_mpd": "https://api/{service}/{id}/mpd",
                "apiformat_key": "https://api/{service}/{id}/key/{pssh-box}",
                "languages": ["en", "fr"],
                "bandwidth_tier": "high",
                "max_segment_num": 6,
                "outpath": "/out",
                "repo_root": "/repo",
                "decrypter_path": "/bin/decrypt.sh"
            }"#,
        )
        .unwrap();

        let cfg = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(cfg.service, "svc");
        assert_eq!(cfg.bandwidth_tier, BandwidthTier::High);
        assert_eq!(cfg.languages, vec!["en".to_string(), "fr".to_string()]);
    }
}
