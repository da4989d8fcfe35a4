//! Capability table mapping format families to transformers.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::audio::AudioTransformer;
use super::config::ToolsConfig;
use super::document::DocumentTransformer;
use super::ffmpeg::FfmpegRunner;
use super::image::ImageTransformer;
use super::traits::Transformer;
use super::video::VideoTransformer;
use crate::detect::FormatFamily;

/// Registered transformers, one per family.
///
/// Supporting a new family means registering a transformer here; the
/// dispatcher only ever asks this table.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: HashMap<FormatFamily, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in image, video, audio and document transformers.
    pub fn with_defaults(tools: &ToolsConfig) -> Self {
        let runner = FfmpegRunner::new(tools.clone());
        let mut registry = Self::new();
        registry.register(Arc::new(ImageTransformer::new()));
        registry.register(Arc::new(VideoTransformer::new(runner.clone())));
        registry.register(Arc::new(AudioTransformer::new(runner)));
        registry.register(Arc::new(DocumentTransformer::new(tools.clone())));
        registry
    }

    /// Registers a transformer for its family, replacing any previous one.
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers.insert(transformer.family(), transformer);
    }

    pub fn get(&self, family: FormatFamily) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(&family).cloned()
    }

    pub fn supports_family(&self, family: FormatFamily) -> bool {
        self.transformers.contains_key(&family)
    }

    /// Whether `family` has a transformer that can convert into `target`.
    pub fn supports_target(&self, family: FormatFamily, target: &str) -> bool {
        self.transformers
            .get(&family)
            .map(|t| t.supports_target(target))
            .unwrap_or(false)
    }

    pub fn families(&self) -> Vec<FormatFamily> {
        let mut families: Vec<_> = self.transformers.keys().copied().collect();
        families.sort_by_key(|f| f.as_str());
        families
    }

    /// Validates every registered transformer, logging the ones that are not ready.
    ///
    /// Returns the families whose tools are missing.
    pub async fn validate_all(&self) -> Vec<FormatFamily> {
        let mut unavailable = Vec::new();
        for family in self.families() {
            if let Some(transformer) = self.transformers.get(&family) {
                match transformer.validate().await {
                    Ok(()) => info!("Transformer {} ready", transformer.name()),
                    Err(e) => {
                        warn!("Transformer {} unavailable: {}", transformer.name(), e);
                        unavailable.push(family);
                    }
                }
            }
        }
        unavailable
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("families", &self.families())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_families() {
        let registry = TransformerRegistry::with_defaults(&ToolsConfig::default());
        assert_eq!(
            registry.families(),
            vec![
                FormatFamily::Audio,
                FormatFamily::Document,
                FormatFamily::Image,
                FormatFamily::Video
            ]
        );
    }

    #[test]
    fn test_supports_target() {
        let registry = TransformerRegistry::with_defaults(&ToolsConfig::default());
        assert!(registry.supports_target(FormatFamily::Image, "webp"));
        assert!(registry.supports_target(FormatFamily::Document, "png"));
        assert!(!registry.supports_target(FormatFamily::Video, "gif"));
        assert!(!registry.supports_target(FormatFamily::Audio, "flac"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = TransformerRegistry::new();
        assert!(!registry.supports_family(FormatFamily::Image));
        assert!(registry.get(FormatFamily::Image).is_none());
        assert!(!registry.supports_target(FormatFamily::Image, "png"));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = TransformerRegistry::new();
        registry.register(Arc::new(ImageTransformer::new()));
        registry.register(Arc::new(ImageTransformer::new()));
        assert_eq!(registry.families().len(), 1);
    }
}
