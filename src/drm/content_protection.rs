//! Normalizes raw `ContentProtection` XML elements into [`DrmInfo`]
//! descriptors (spec.md §4.7).

use std::collections::BTreeSet;

use tracing::warn;

use crate::drm::playready;
use crate::drm::scheme::{key_system_for_scheme_id, MP4_PROTECTION_SCHEME};
use crate::error::{Code, EngineError, Result};
use crate::model::stream::{DrmInfo, InitDataOverride};

/// One `<ContentProtection>` element as lifted out of the MPD XML, before
/// scheme resolution. Field presence mirrors which child/attribute the
/// scheme in question actually uses.
#[derive(Debug, Clone, Default)]
pub struct ContentProtectionElement {
    pub scheme_id_uri: String,
    pub default_kid: Option<String>,
    pub cenc_pssh_base64: Option<String>,
    pub widevine_laurl: Option<String>,
    pub clearkey_laurl: Option<String>,
    pub playready_pro_base64: Option<String>,
}

/// The normalized outcome of resolving one level's (AdaptationSet or
/// Representation) full set of `ContentProtection` elements.
#[derive(Debug, Clone, Default)]
pub struct ContentProtectionResult {
    pub default_key_ids: BTreeSet<String>,
    pub init_data: Vec<InitDataOverride>,
    pub drm_infos: Vec<DrmInfo>,
}

/// Resolve one level's `ContentProtection` children into a
/// [`ContentProtectionResult`].
pub fn parse_content_protection(elements: &[ContentProtectionElement]) -> Result<ContentProtectionResult> {
    let mut result = ContentProtectionResult::default();
    let mut seen_default_kid: Option<String> = None;

    for el in elements {
        let scheme = el.scheme_id_uri.trim().to_ascii_lowercase();

        if let Some(kid_raw) = &el.default_kid {
            if kid_raw.contains(' ') {
                return Err(EngineError::coded(
                    Code::DashMultipleKeyIdsNotSupported,
                    format!("default_KID '{kid_raw}' lists more than one key ID"),
                ));
            }
            let kid = kid_raw.to_ascii_lowercase().replace('-', "");
            match &seen_default_kid {
                None => seen_default_kid = Some(kid.clone()),
                Some(existing) if existing != &kid => {
                    return Err(EngineError::coded(
                        Code::DashConflictingKeyIds,
                        format!("conflicting default_KID values '{existing}' vs '{kid}'"),
                    ));
                }
                _ => {}
            }
            result.default_key_ids.insert(kid);
        }

        if let Some(pssh_b64) = &el.cenc_pssh_base64 {
            match crate::mp4::pssh::decode_base64_pssh(pssh_b64) {
                Ok(data) => result.init_data.push(InitDataOverride {
                    init_data_type: "cenc".to_string(),
                    data,
                }),
                Err(e) => warn!("failed to decode cenc:pssh base64: {e}"),
            }
        }

        if scheme == MP4_PROTECTION_SCHEME {
            continue;
        }

        let Some(key_system) = key_system_for_scheme_id(&scheme) else {
            warn!("unrecognized ContentProtection schemeIdUri: {scheme}");
            continue;
        };

        let mut drm = DrmInfo::new(key_system);
        drm.key_ids = result.default_key_ids.clone();
        drm.init_data = result.init_data.clone();

        match key_system {
            "com.widevine.alpha" => {
                drm.license_server_uri = el.widevine_laurl.clone();
                if let Some(pssh_b64) = &el.cenc_pssh_base64 {
                    drm.widevine_pssh_base64 = Some(pssh_b64.trim().to_string());
                }
            }
            "org.w3.clearkey" => {
                drm.license_server_uri = el.clearkey_laurl.clone();
            }
            "com.microsoft.playready" => {
                if let Some(pro_b64) = &el.playready_pro_base64 {
                    if let Ok(pro_bytes) =
                        crate::mp4::pssh::decode_base64_pssh(pro_b64)
                    {
                        if let Ok(records) = playready::parse_pro(&pro_bytes) {
                            drm.license_server_uri = playready::extract_la_url(&records);
                        }
                    }
                }
            }
            _ => {}
        }

        result.drm_infos.push(drm);
    }

    Ok(result)
}

/// Update a Representation's effective key-system set against its owning
/// AdaptationSet's running set. If the AdaptationSet was unknown or
/// unencrypted and the representation carries DRM info, the
/// representation's set replaces it outright; otherwise the two sets are
/// intersected by key system. An empty intersection is
/// `DASH_NO_COMMON_KEY_SYSTEM`.
pub fn intersect_with_adaptation_set(
    adaptation_drm: &mut Vec<DrmInfo>,
    representation_drm: &[DrmInfo],
) -> Result<()> {
    if representation_drm.is_empty() {
        return Ok(());
    }
    if adaptation_drm.is_empty() {
        *adaptation_drm = representation_drm.to_vec();
        return Ok(());
    }

    let rep_systems: BTreeSet<&str> = representation_drm
        .iter()
        .map(|d| d.key_system.as_str())
        .collect();
    adaptation_drm.retain(|d| rep_systems.contains(d.key_system.as_str()));

    if adaptation_drm.is_empty() {
        return Err(EngineError::coded(
            Code::DashNoCommonKeySystem,
            "no common key system between AdaptationSet and Representation",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(scheme: &str) -> ContentProtectionElement {
        ContentProtectionElement {
            scheme_id_uri: scheme.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn mp4protection_contributes_no_drm_info() {
        let r = parse_content_protection(&[el(MP4_PROTECTION_SCHEME)]).unwrap();
        assert!(r.drm_infos.is_empty());
    }

    #[test]
    fn widevine_scheme_emits_drm_info() {
        let r = parse_content_protection(&[el(
            "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed",
        )])
        .unwrap();
        assert_eq!(r.drm_infos.len(), 1);
        assert_eq!(r.drm_infos[0].key_system, "com.widevine.alpha");
    }

    #[test]
    fn conflicting_default_kids_fail() {
        let mut a = el(MP4_PROTECTION_SCHEME);
        a.default_kid = Some("11111111111111111111111111111111".to_string());
        let mut b = el("urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed");
        b.default_kid = Some("22222222222222222222222222222222".to_string());
        let err = parse_content_protection(&[a, b]).unwrap_err();
        assert_eq!(err.code(), Some(Code::DashConflictingKeyIds));
    }

    #[test]
    fn kid_with_space_rejected() {
        let mut a = el(MP4_PROTECTION_SCHEME);
        a.default_kid = Some("aaaa bbbb".to_string());
        let err = parse_content_protection(&[a]).unwrap_err();
        assert_eq!(err.code(), Some(Code::DashMultipleKeyIdsNotSupported));
    }

    #[test]
    fn intersection_narrows_to_common_systems() {
        let mut adaptation = vec![DrmInfo::new("com.widevine.alpha"), DrmInfo::new("com.microsoft.playready")];
        let representation = vec![DrmInfo::new("com.widevine.alpha")];
        intersect_with_adaptation_set(&mut adaptation, &representation).unwrap();
        assert_eq!(adaptation.len(), 1);
        assert_eq!(adaptation[0].key_system, "com.widevine.alpha");
    }

    #[test]
    fn empty_intersection_fails() {
        let mut adaptation = vec![DrmInfo::new("com.widevine.alpha")];
        let representation = vec![DrmInfo::new("com.microsoft.playready")];
        let err = intersect_with_adaptation_set(&mut adaptation, &representation).unwrap_err();
        assert_eq!(err.code(), Some(Code::DashNoCommonKeySystem));
    }
}
