//! The `schemeIdUri` (urn:uuid:…) → DRM key-system table from spec.md §6.

/// The Widevine system ID, referenced directly by the PSSH parser and the
/// key-API client.
pub const WIDEVINE_SYSTEM_ID: &str = "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";

/// `urn:mpeg:dash:mp4protection:2011` — contributes default init data but
/// is never itself emitted as a DrmInfo entry.
pub const MP4_PROTECTION_SCHEME: &str = "urn:mpeg:dash:mp4protection:2011";

/// Map a lowercased `schemeIdUri` (with or without the `urn:uuid:` prefix)
/// to the key system it identifies, per spec.md §6's table.
pub fn key_system_for_scheme_id(scheme_id_uri: &str) -> Option<&'static str> {
    let uuid = scheme_id_uri
        .trim()
        .to_ascii_lowercase()
        .trim_start_matches("urn:uuid:")
        .to_string();
    match uuid.as_str() {
        "1077efec-c0b2-4d02-ace3-3c1e52e2fb4b" => Some("org.w3.clearkey"),
        "e2719d58-a985-b3c9-781a-b030af78d30e" => Some("org.w3.clearkey"),
        "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed" => Some("com.widevine.alpha"),
        "9a04f079-9840-4286-ab92-e65be0885f95" => Some("com.microsoft.playready"),
        "79f0049a-4098-8642-ab92-e65be0885f95" => Some("com.microsoft.playready"),
        "f239e769-efa3-4850-9c16-a903c6932efb" => Some("com.adobe.primetime"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widevine_uuid_maps_to_widevine() {
        assert_eq!(
            key_system_for_scheme_id("urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"),
            Some("com.widevine.alpha")
        );
    }

    #[test]
    fn case_insensitive_and_prefix_optional() {
        assert_eq!(
            key_system_for_scheme_id("EDEF8BA9-79D6-4ACE-A3C8-27DCD51D21ED"),
            Some("com.widevine.alpha")
        );
    }

    #[test]
    fn unknown_scheme_returns_none() {
        assert_eq!(key_system_for_scheme_id("urn:uuid:00000000-0000-0000-0000-000000000000"), None);
    }
}
