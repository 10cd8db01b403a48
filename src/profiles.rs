//! Static ProRes encoding profiles and frame-rate presets.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::media::Framerate;

#[derive(Debug, Clone, Serialize)]
pub struct EncodingProfile {
    pub label: &'static str,
    pub codec: &'static str,
    /// ffmpeg `-profile:v` index.
    pub profile: u8,
    pub vendor: &'static str,
    pub pix_fmt: &'static str,
}

impl EncodingProfile {
    /// Codec argument block for an encode invocation.
    pub fn codec_args(&self) -> Vec<String> {
        vec![
            "-vcodec".to_string(),
            self.codec.to_string(),
            "-profile:v".to_string(),
            self.profile.to_string(),
            "-vendor".to_string(),
            self.vendor.to_string(),
            "-pix_fmt".to_string(),
            self.pix_fmt.to_string(),
        ]
    }
}

const fn prores(label: &'static str, profile: u8, pix_fmt: &'static str) -> EncodingProfile {
    EncodingProfile {
        label,
        codec: "prores_ks",
        profile,
        vendor: "ap10",
        pix_fmt,
    }
}

static PROFILES: Lazy<BTreeMap<&'static str, EncodingProfile>> = Lazy::new(|| {
    BTreeMap::from([
        ("prores_422_proxy", prores("ProRes 422 Proxy", 0, "yuv422p10")),
        ("prores_422_lt", prores("ProRes 422 LT", 1, "yuv422p10")),
        ("prores_422", prores("ProRes 422", 2, "yuv422p10")),
        ("prores_422_hq", prores("ProRes 422 HQ", 3, "yuv422p10")),
        ("prores_4444", prores("ProRes 4444", 4, "yuva444p10")),
        ("prores_4444_xq", prores("ProRes 4444 XQ", 5, "yuva444p10")),
    ])
});

#[derive(Debug, Clone, Serialize)]
pub struct FrameratePreset {
    pub label: &'static str,
    pub rate: Framerate,
}

static FRAMERATES: Lazy<BTreeMap<&'static str, FrameratePreset>> = Lazy::new(|| {
    BTreeMap::from([
        ("fps_23_98", FrameratePreset { label: "23.98 fps", rate: Framerate(24000, 1001) }),
        ("fps_24", FrameratePreset { label: "24 fps", rate: Framerate(24, 1) }),
        ("fps_25", FrameratePreset { label: "25 fps", rate: Framerate(25, 1) }),
        ("fps_30", FrameratePreset { label: "30 fps", rate: Framerate(30, 1) }),
        ("fps_60", FrameratePreset { label: "60 fps", rate: Framerate(60, 1) }),
    ])
});

pub fn profile(key: &str) -> Option<&'static EncodingProfile> {
    PROFILES.get(key)
}

pub fn profiles() -> impl Iterator<Item = (&'static str, &'static EncodingProfile)> {
    PROFILES.iter().map(|(k, v)| (*k, v))
}

/// Resolve a frame-rate preset key; an empty key means "use the item's own
/// rate" and resolves to `None`.
pub fn framerate(key: &str) -> Option<Framerate> {
    if key.is_empty() {
        return None;
    }
    FRAMERATES.get(key).map(|preset| preset.rate)
}

pub fn framerates() -> impl Iterator<Item = (&'static str, &'static FrameratePreset)> {
    FRAMERATES.iter().map(|(k, v)| (*k, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_table_carries_all_prores_flavours() {
        let keys: Vec<&str> = profiles().map(|(k, _)| k).collect();
        for expected in [
            "prores_422_proxy",
            "prores_422_lt",
            "prores_422",
            "prores_422_hq",
            "prores_4444",
            "prores_4444_xq",
        ] {
            assert!(keys.contains(&expected), "missing profile {expected}");
        }
    }

    #[test]
    fn four_four_four_profiles_switch_pixel_format() {
        assert_eq!(profile("prores_422_hq").unwrap().pix_fmt, "yuv422p10");
        assert_eq!(profile("prores_4444").unwrap().pix_fmt, "yuva444p10");
        assert_eq!(profile("prores_4444_xq").unwrap().pix_fmt, "yuva444p10");
    }

    #[test]
    fn codec_args_spell_out_the_full_prores_invocation() {
        let args = profile("prores_422_hq").unwrap().codec_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        assert_eq!(
            args,
            [
                "-vcodec", "prores_ks", "-profile:v", "3", "-vendor", "ap10", "-pix_fmt",
                "yuv422p10",
            ]
        );
    }

    #[test]
    fn framerate_presets_resolve_and_empty_key_means_item_rate() {
        assert_eq!(framerate("fps_23_98"), Some(Framerate(24000, 1001)));
        assert_eq!(framerate("fps_25"), Some(Framerate(25, 1)));
        assert_eq!(framerate(""), None);
        assert_eq!(framerate("fps_120"), None);
    }
}
