use serde::Serialize;

use crate::models::{Hyperparameters, StartFinetuningRequest};

/// Per-model training profile. Unknown model names fall back to
/// `GENERIC_PROFILE`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelProfile {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub batch_size: u32,
    pub max_length: u32,
    pub learning_rate: f64,
    pub lora_rank: u32,
    pub lora_alpha: u32,
    pub gradient_accumulation_steps: u32,
    pub vram_required_gb: f32,
    pub quality_rating: &'static str,
    pub speed_rating: &'static str,
}

pub const MODEL_PROFILES: &[ModelProfile] = &[
    ModelProfile {
        name: "distilgpt2",
        display_name: "DistilGPT-2 (82M)",
        description: "Distilled GPT-2, smallest and fastest option",
        batch_size: 8,
        max_length: 512,
        learning_rate: 5e-5,
        lora_rank: 32,
        lora_alpha: 64,
        gradient_accumulation_steps: 1,
        vram_required_gb: 2.0,
        quality_rating: "basic",
        speed_rating: "fast",
    },
    ModelProfile {
        name: "gpt2",
        display_name: "GPT-2 (124M)",
        description: "Baseline small causal LM, good default",
        batch_size: 4,
        max_length: 512,
        learning_rate: 2e-5,
        lora_rank: 32,
        lora_alpha: 64,
        gradient_accumulation_steps: 1,
        vram_required_gb: 4.0,
        quality_rating: "good",
        speed_rating: "fast",
    },
    ModelProfile {
        name: "gpt2-medium",
        display_name: "GPT-2 Medium (355M)",
        description: "Larger GPT-2 variant, better quality at slower speed",
        batch_size: 2,
        max_length: 512,
        learning_rate: 2e-5,
        lora_rank: 32,
        lora_alpha: 64,
        gradient_accumulation_steps: 2,
        vram_required_gb: 8.0,
        quality_rating: "better",
        speed_rating: "medium",
    },
    ModelProfile {
        name: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        display_name: "TinyLlama 1.1B Chat",
        description: "Small Llama-family chat model",
        batch_size: 1,
        max_length: 1024,
        learning_rate: 1e-5,
        lora_rank: 16,
        lora_alpha: 32,
        gradient_accumulation_steps: 4,
        vram_required_gb: 12.0,
        quality_rating: "better",
        speed_rating: "slow",
    },
    ModelProfile {
        name: "microsoft/phi-1_5",
        display_name: "Phi-1.5 (1.3B)",
        description: "Phi-family model with strong reasoning for its size",
        batch_size: 1,
        max_length: 1024,
        learning_rate: 1e-5,
        lora_rank: 16,
        lora_alpha: 32,
        gradient_accumulation_steps: 4,
        vram_required_gb: 12.0,
        quality_rating: "best",
        speed_rating: "slow",
    },
];

pub const GENERIC_PROFILE: ModelProfile = ModelProfile {
    name: "generic",
    display_name: "Generic causal LM",
    description: "Fallback profile for unknown base models",
    batch_size: 4,
    max_length: 512,
    learning_rate: 2e-5,
    lora_rank: 8,
    lora_alpha: 32,
    gradient_accumulation_steps: 1,
    vram_required_gb: 8.0,
    quality_rating: "unknown",
    speed_rating: "unknown",
};

pub fn profile_for(model_name: &str) -> &'static ModelProfile {
    MODEL_PROFILES
        .iter()
        .find(|profile| profile.name == model_name)
        .unwrap_or(&GENERIC_PROFILE)
}

/// Module names LoRA adapters are injected into, plus the default rank for
/// the architecture family. Pure function of the model name; families are
/// matched by substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetModules {
    pub modules: &'static [&'static str],
    pub default_rank: u32,
    pub default_alpha: u32,
}

pub fn lora_target_modules(model_name: &str) -> TargetModules {
    let lower = model_name.to_lowercase();

    // GPT-2 uses fused attention projections; the others use split Q/K/V.
    if lower.contains("gpt2") || lower.contains("distilgpt") {
        TargetModules {
            modules: &["c_attn", "c_proj"],
            default_rank: 32,
            default_alpha: 64,
        }
    } else if lower.contains("llama") {
        TargetModules {
            modules: &["q_proj", "k_proj", "v_proj", "o_proj"],
            default_rank: 16,
            default_alpha: 32,
        }
    } else if lower.contains("phi") {
        TargetModules {
            modules: &["q_proj", "k_proj", "v_proj", "dense"],
            default_rank: 16,
            default_alpha: 32,
        }
    } else if lower.contains("mistral") {
        TargetModules {
            modules: &["q_proj", "v_proj"],
            default_rank: 16,
            default_alpha: 32,
        }
    } else {
        TargetModules {
            modules: &["q_proj", "v_proj"],
            default_rank: 8,
            default_alpha: 32,
        }
    }
}

/// Request values win; anything unspecified falls back to the model profile.
pub fn resolve_hyperparameters(request: &StartFinetuningRequest) -> Hyperparameters {
    let profile = profile_for(&request.model_name);

    Hyperparameters {
        learning_rate: request.learning_rate.unwrap_or(profile.learning_rate),
        num_epochs: request.num_epochs.unwrap_or(3),
        batch_size: request.batch_size.unwrap_or(profile.batch_size),
        max_length: request.max_length.unwrap_or(profile.max_length),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt2_family_uses_fused_projections() {
        let target = lora_target_modules("gpt2");
        assert!(target.modules.contains(&"c_attn"));
        assert_eq!(target.default_rank, 32);
        assert_eq!(target.default_alpha, 64);

        let distil = lora_target_modules("distilgpt2");
        assert_eq!(distil, target);
    }

    #[test]
    fn llama_family_uses_split_projections() {
        let target = lora_target_modules("TinyLlama/TinyLlama-1.1B-Chat-v1.0");
        assert!(target.modules.contains(&"q_proj"));
        assert!(target.modules.contains(&"o_proj"));
        assert_eq!(target.default_rank, 16);
    }

    #[test]
    fn unknown_models_fall_back_to_generic_projections() {
        let target = lora_target_modules("EleutherAI/pythia-160m");
        assert_eq!(target.modules, &["q_proj", "v_proj"]);
        assert_eq!(target.default_rank, 8);
    }

    #[test]
    fn unknown_profile_falls_back_to_generic() {
        let profile = profile_for("some/unknown-model");
        assert_eq!(profile.name, "generic");
    }

    #[test]
    fn request_values_override_profile_defaults() {
        let request = StartFinetuningRequest {
            dataset_id: "ds".to_string(),
            model_name: "gpt2".to_string(),
            learning_rate: Some(1e-4),
            num_epochs: Some(5),
            batch_size: None,
            max_length: None,
        };

        let hp = resolve_hyperparameters(&request);
        assert_eq!(hp.learning_rate, 1e-4);
        assert_eq!(hp.num_epochs, 5);
        assert_eq!(hp.batch_size, 4); // gpt2 profile default
        assert_eq!(hp.max_length, 512);
    }
}
