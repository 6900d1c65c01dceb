//! Vision Adapter (spec §4.2): provider-agnostic image→text completion with
//! a round-robin client pool, credential discovery, and fallback across
//! providers.
//!
//! Providers and models are discovered from configuration at startup rather
//! than hard-coded as a Rust enum (spec §9 "Dynamic provider/model enum");
//! [`ProviderRegistry`] is the string-keyed registry that plays the role a
//! compile-time enum would in a less dynamic design. The actual HTTP/SDK
//! call is delegated to `edgequake_llm`'s `ProviderFactory`, matching the
//! completion backend the teacher crate already depends on.

use crate::config::OrchestratorConfig;
use crate::error::VisionError;
use crate::model::{ProviderRegistry, ProviderSpec};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_PROVIDER_CHOICES: &[&str] = &["openai", "anthropic", "gemini", "mistral"];

/// Load the dynamic provider/model registry from the environment (spec §4.2
/// "Provider selection", grounded in `vision_service.py::_load_provider_specs`).
pub fn load_registry_from_env() -> ProviderRegistry {
    let choices: Vec<String> = env::var("VISION_PROVIDER_CHOICES")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
        .unwrap_or_else(|| DEFAULT_PROVIDER_CHOICES.iter().map(|s| s.to_string()).collect());

    let mut registry = ProviderRegistry::default();
    for name in choices {
        let upper = name.to_uppercase();
        let models: Vec<String> = env::var(format!("VISION_MODELS_{upper}"))
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.split(',').map(|m| m.trim().to_string()).collect())
            .unwrap_or_else(|| vec![default_vision_model_for_provider(&name).to_string()]);

        let requested_default = env::var(format!("VISION_DEFAULT_MODEL_{upper}")).ok();
        let default_model = match requested_default {
            Some(model) if models.iter().any(|m| m == &model) => model,
            Some(_) | None => models
                .first()
                .cloned()
                .unwrap_or_else(|| default_vision_model_for_provider(&name).to_string()),
        };

        registry.order.push(name.clone());
        registry.providers.insert(
            name.clone(),
            ProviderSpec {
                name,
                models,
                default_model,
            },
        );
    }
    registry
}

fn default_vision_model_for_provider(provider_name: &str) -> &'static str {
    match provider_name {
        "mistral" | "mistral-ai" | "mistralai" => "pixtral-12b-2409",
        "ollama" => "llava",
        "lmstudio" | "lm-studio" | "lm_studio" => "llava",
        "gemini" | "google" => "gemini-2.0-flash",
        "anthropic" => "claude-sonnet-4-20250514",
        _ => "gpt-4.1-nano",
    }
}

fn provider_has_credentials(name: &str) -> bool {
    let var = match name {
        "openai" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        "gemini" | "google" => "GEMINI_API_KEY",
        "mistral" | "mistral-ai" | "mistralai" => "MISTRAL_API_KEY",
        _ => return false,
    };
    env::var(var).map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Round-robin pool of OpenAI-compatible client base URLs, guarded by a
/// single mutex (spec §4.2 "Client pool", direct port of
/// `OpenAICompatibleClientPool`'s `itertools::cycle` + `Lock` idiom).
pub struct ClientPool {
    urls: Vec<String>,
    next: Mutex<AtomicUsize>,
}

impl ClientPool {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            next: Mutex::new(AtomicUsize::new(0)),
        }
    }

    pub fn has_clients(&self) -> bool {
        !self.urls.is_empty()
    }

    /// Return the next base URL in the cycle. A single-URL pool always
    /// returns that URL without touching the counter, mirroring the
    /// source's `_single` fast path.
    pub fn get_url(&self) -> Option<&str> {
        if self.urls.is_empty() {
            return None;
        }
        if self.urls.len() == 1 {
            return Some(&self.urls[0]);
        }
        let guard = self.next.lock().unwrap();
        let idx = guard.fetch_add(1, Ordering::SeqCst) % self.urls.len();
        Some(&self.urls[idx])
    }
}

/// Resolve the canonical instruction prompt, or the caller's override with
/// context appended under a labeled block (spec §4.2 "Prompt composition").
pub fn build_vision_prompt(context: &str, prompt_override: Option<&str>) -> String {
    match prompt_override {
        Some(p) if !p.trim().is_empty() => {
            if context.trim().is_empty() {
                p.to_string()
            } else {
                format!("{p}\n\nContext:\n{context}")
            }
        }
        _ => {
            let base = "Describe the visual content of this image precisely. \
                Prefer what you see over any conflicting surrounding text. \
                Respond with plain descriptive prose only — no meta-commentary, \
                no preamble, and do not echo internal markers such as \
                '[Page N]' or '[ChunkType=...]'.";
            if context.trim().is_empty() {
                base.to_string()
            } else {
                format!("{base}\n\nContext:\n{context}")
            }
        }
    }
}

/// One operation: `complete(image_path, context, prompt_override?, provider?,
/// model?) → text` (spec §4.2).
pub struct VisionAdapter {
    registry: ProviderRegistry,
    default_provider: Option<String>,
    default_model: Option<String>,
}

impl VisionAdapter {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            registry: load_registry_from_env(),
            default_provider: config.vision_provider.clone(),
            default_model: config.vision_model.clone(),
        }
    }

    /// Priority chain for provider selection (spec §4.2 "Provider selection"):
    /// explicit argument > environment default > first credentialed provider >
    /// first provider in the allow-list.
    fn resolve_provider_name(&self, explicit: Option<&str>) -> Result<String, VisionError> {
        if let Some(p) = explicit {
            if self.registry.get(p).is_some() {
                return Ok(p.to_string());
            }
        }
        if let Some(ref p) = self.default_provider {
            if self.registry.get(p).is_some() {
                return Ok(p.clone());
            }
        }
        if let Some(credentialed) = self
            .registry
            .order
            .iter()
            .find(|name| provider_has_credentials(name))
        {
            return Ok(credentialed.clone());
        }
        self.registry
            .order
            .first()
            .cloned()
            .ok_or_else(|| VisionError::CompletionFailed {
                detail: "no vision provider is configured".into(),
            })
    }

    fn resolve_model(&self, provider: &ProviderSpec, explicit: Option<&str>) -> Result<String, VisionError> {
        if let Some(m) = explicit.or(self.default_model.as_deref()) {
            if provider.models.iter().any(|known| known == m) {
                return Ok(m.to_string());
            }
            return Err(VisionError::CompletionFailed {
                detail: format!(
                    "model '{m}' is not offered by provider '{}'; supported: {}",
                    provider.name,
                    provider.models.join(", ")
                ),
            });
        }
        Ok(provider.default_model.clone())
    }

    fn build_llm_provider(&self, name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, VisionError> {
        ProviderFactory::create_llm_provider(name, model).map_err(|e| VisionError::CompletionFailed {
            detail: format!("provider '{name}' not configured: {e}"),
        })
    }

    async fn call_provider(
        &self,
        provider_name: &str,
        model: &str,
        image_path: &Path,
        context: &str,
        prompt_override: Option<&str>,
    ) -> Result<String, VisionError> {
        let provider = self.build_llm_provider(provider_name, model)?;
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| VisionError::ImageUnreadable {
                path: image_path.display().to_string(),
                detail: e.to_string(),
            })?;
        let image = ImageData::new(STANDARD.encode(&bytes), "image/jpeg");
        let prompt = build_vision_prompt(context, prompt_override);
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];
        let response = provider
            .chat(&messages, Some(&CompletionOptions::default()))
            .await
            .map_err(|e| VisionError::CompletionFailed { detail: e.to_string() })?;
        Ok(response.content)
    }

    /// `complete(image_path, context, prompt_override?, provider?, model?) → text`.
    ///
    /// On failure, tries each other credentialed provider once in
    /// declaration order before giving up (spec §4.2 "Fallback").
    pub async fn complete(
        &self,
        image_path: &Path,
        context: &str,
        prompt_override: Option<&str>,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<String, VisionError> {
        let chosen_name = self.resolve_provider_name(provider)?;
        let chosen_spec = self.registry.get(&chosen_name).ok_or_else(|| VisionError::CompletionFailed {
            detail: format!("unknown provider '{chosen_name}'"),
        })?;
        let chosen_model = self.resolve_model(chosen_spec, model)?;

        match self
            .call_provider(&chosen_name, &chosen_model, image_path, context, prompt_override)
            .await
        {
            Ok(text) => return Ok(text),
            Err(first_err) => {
                for candidate in &self.registry.order {
                    if candidate == &chosen_name || !provider_has_credentials(candidate) {
                        continue;
                    }
                    let Some(spec) = self.registry.get(candidate) else { continue };
                    if let Ok(text) = self
                        .call_provider(candidate, &spec.default_model, image_path, context, prompt_override)
                        .await
                    {
                        return Ok(text);
                    }
                }
                Err(first_err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_override_appends_context_under_labeled_block() {
        let prompt = build_vision_prompt("prior context", Some("Describe the chart."));
        assert!(prompt.starts_with("Describe the chart."));
        assert!(prompt.contains("Context:\nprior context"));
    }

    #[test]
    fn default_prompt_never_echoes_internal_markers() {
        let prompt = build_vision_prompt("", None);
        assert!(!prompt.contains("[Page"));
    }

    #[test]
    fn client_pool_cycles_multiple_urls() {
        let pool = ClientPool::new(vec!["a".into(), "b".into()]);
        assert_eq!(pool.get_url(), Some("a"));
        assert_eq!(pool.get_url(), Some("b"));
        assert_eq!(pool.get_url(), Some("a"));
    }

    #[test]
    fn client_pool_single_url_is_stable() {
        let pool = ClientPool::new(vec!["only".into()]);
        assert_eq!(pool.get_url(), Some("only"));
        assert_eq!(pool.get_url(), Some("only"));
    }

    #[test]
    fn provider_registry_finds_provider_for_model() {
        let mut registry = ProviderRegistry::default();
        registry.order.push("openai".into());
        registry.providers.insert(
            "openai".into(),
            ProviderSpec {
                name: "openai".into(),
                models: vec!["gpt-4.1-nano".into()],
                default_model: "gpt-4.1-nano".into(),
            },
        );
        assert_eq!(registry.provider_for_model("gpt-4.1-nano"), Some("openai"));
        assert_eq!(registry.provider_for_model("unknown-model"), None);
    }
}
