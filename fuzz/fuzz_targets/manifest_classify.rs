#![no_main]

use libfuzzer_sys::fuzz_target;
use webext_permission_toggle::manifest::{
    parse_extension_manifest, ManifestPermissionSet, ORIGIN_SCHEME_SEPARATOR,
};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(manifest) = parse_extension_manifest(&raw) else {
        return;
    };
    let classified = ManifestPermissionSet::classify(&manifest);
    assert!(classified
        .origins
        .iter()
        .all(|entry| entry.contains(ORIGIN_SCHEME_SEPARATOR)));
    assert!(classified
        .permissions
        .iter()
        .all(|entry| !entry.contains(ORIGIN_SCHEME_SEPARATOR)));
    assert!(classified
        .origins
        .iter()
        .all(|origin| !classified.permissions.contains(origin)));
    let declared = manifest.permissions.len()
        + manifest
            .content_scripts
            .iter()
            .map(|script| script.matches.len())
            .sum::<usize>();
    assert!(classified.origins.len() + classified.permissions.len() <= declared);
});
