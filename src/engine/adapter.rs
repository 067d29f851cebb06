//! Pure config adapters: unified [`GenerationConfig`] to each backend's
//! accepted parameter subset. Adapters never fail and never touch I/O;
//! unsupported fields are dropped, unsupported resolutions snap to the
//! nearest supported bucket with the substitution reported to the caller.

use serde::Serialize;

use crate::engine::contracts::{GenerationConfig, Quality};

/// Result of snapping a requested resolution onto a supported bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnappedResolution {
    pub width: u32,
    pub height: u32,
    pub substituted: bool,
}

/// Pick the supported resolution closest (squared Euclidean distance) to
/// the requested one. Falls back to the request itself when the bucket list
/// is empty.
pub fn snap_resolution(supported: &[(u32, u32)], width: u32, height: u32) -> SnappedResolution {
    if supported.is_empty() || supported.contains(&(width, height)) {
        return SnappedResolution {
            width,
            height,
            substituted: false,
        };
    }

    let (w, h) = supported
        .iter()
        .copied()
        .min_by_key(|(sw, sh)| {
            let dw = *sw as i64 - width as i64;
            let dh = *sh as i64 - height as i64;
            dw * dw + dh * dh
        })
        .expect("non-empty bucket list");

    SnappedResolution {
        width: w,
        height: h,
        substituted: true,
    }
}

/// Parameters accepted by the Pollinations image endpoint.
///
/// Pollinations has no negative prompt, steps, guidance or batch controls;
/// those unified fields are dropped here.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PollinationsParams {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub nologo: bool,
    pub enhance: bool,
    pub safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

pub fn to_pollinations(config: &GenerationConfig) -> PollinationsParams {
    PollinationsParams {
        prompt: config.prompt.clone(),
        width: config.width,
        height: config.height,
        model: if config.model.is_empty() {
            "flux".to_string()
        } else {
            config.model.clone()
        },
        nologo: extra_bool(config, "nologo", true),
        enhance: extra_bool(config, "enhance", false),
        safe: extra_bool(config, "safe", true),
        seed: (config.seed >= 0).then_some(config.seed),
    }
}

/// Parameters for a ComfyUI txt2img workflow
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComfyUiParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub seed: i64,
    pub batch_size: u32,
    pub sampler_name: String,
    pub scheduler: String,
}

pub fn to_comfyui(config: &GenerationConfig) -> ComfyUiParams {
    ComfyUiParams {
        prompt: config.prompt.clone(),
        negative_prompt: config.negative_prompt.clone(),
        width: config.width,
        height: config.height,
        steps: config.steps,
        cfg_scale: config.guidance_scale,
        seed: config.seed,
        batch_size: config.batch_size,
        sampler_name: extra_str(config, "sampler", "euler"),
        scheduler: extra_str(config, "scheduler", "normal"),
    }
}

/// DALL-E resolutions; anything else snaps onto one of these.
pub const DALLE_RESOLUTIONS: [(u32, u32); 3] = [(1024, 1024), (1792, 1024), (1024, 1792)];

/// Parameters accepted by the OpenAI images endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DalleParams {
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub n: u32,
    pub style: String,
    /// True when the requested resolution was replaced by a supported one.
    #[serde(skip)]
    pub size_substituted: bool,
}

pub fn to_dalle(config: &GenerationConfig) -> DalleParams {
    let snapped = snap_resolution(&DALLE_RESOLUTIONS, config.width, config.height);
    DalleParams {
        prompt: config.prompt.clone(),
        size: format!("{}x{}", snapped.width, snapped.height),
        // DALL-E only distinguishes standard/hd.
        quality: match config.quality {
            Quality::Standard => "standard".to_string(),
            Quality::Hd | Quality::Ultra => "hd".to_string(),
        },
        n: config.batch_size.min(10),
        style: extra_str(config, "style", "natural"),
        size_substituted: snapped.substituted,
    }
}

/// Parameters for the Stability text-to-image endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StabilityParams {
    pub text_prompts: Vec<StabilityTextPrompt>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub samples: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_preset: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StabilityTextPrompt {
    pub text: String,
    pub weight: f32,
}

pub fn to_stability(config: &GenerationConfig) -> StabilityParams {
    let mut text_prompts = vec![StabilityTextPrompt {
        text: config.prompt.clone(),
        weight: 1.0,
    }];
    if !config.negative_prompt.is_empty() {
        text_prompts.push(StabilityTextPrompt {
            text: config.negative_prompt.clone(),
            weight: -1.0,
        });
    }

    StabilityParams {
        text_prompts,
        width: config.width,
        height: config.height,
        steps: config.steps,
        cfg_scale: config.guidance_scale,
        seed: (config.seed > 0).then_some(config.seed as u64),
        samples: config.batch_size,
        style_preset: (!config.style.is_empty() && config.style != "default")
            .then(|| config.style.clone()),
    }
}

/// CogView-3 Flash resolutions (fixed buckets on the bigmodel API)
pub const COGVIEW_RESOLUTIONS: [(u32, u32); 5] = [
    (1024, 1024),
    (768, 1344),
    (1344, 768),
    (864, 1152),
    (1152, 864),
];

/// Parameters accepted by the CogView images endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CogViewParams {
    pub model: String,
    pub prompt: String,
    pub size: String,
    #[serde(skip)]
    pub size_substituted: bool,
}

pub fn to_cogview(config: &GenerationConfig) -> CogViewParams {
    let snapped = snap_resolution(&COGVIEW_RESOLUTIONS, config.width, config.height);
    CogViewParams {
        model: "cogview-3-flash".to_string(),
        prompt: config.prompt.clone(),
        size: format!("{}x{}", snapped.width, snapped.height),
        size_substituted: snapped.substituted,
    }
}

fn extra_bool(config: &GenerationConfig, key: &str, default: bool) -> bool {
    config
        .extras
        .get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}

fn extra_str(config: &GenerationConfig, key: &str, default: &str) -> String {
    config
        .extras
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}
