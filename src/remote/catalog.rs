//! The named capability chains the bot uses, built from configuration.

use reqwest::Client;
use std::sync::Arc;

use crate::config::{BotConfig, CapabilityPolicies, CircuitBreakerConfig, RetryPolicy};
use crate::remote::books::{BookSearch, GOOGLE_BOOKS_URL, OPEN_LIBRARY_URL};
use crate::remote::capability::{RemoteCapability, ResultKind};
use crate::remote::http::{HttpCapability, MediaField, RequestShape, ResponseFormat};
use crate::remote::invoker::ResilientInvoker;
use crate::remote::translate::{GoogleTranslator, MyMemoryTranslator, GOOGLE_TRANSLATE_URL, MYMEMORY_URL};

const OCR_INSTRUCTION: &str = "Extract all text, equations and numbers from the image. \
Preserve the original formatting and order.";

const NANO_ENHANCE: &str = "enhance image quality 8K, improve details, sharpen, increase resolution, \
upscale to ultra high resolution, professional quality enhancement";
const GPT_ENHANCE: &str = "enhance and upscale image quality to 8K resolution, improve details, \
colors and sharpness, professional quality enhancement";
const SEEDREAM_ENHANCE: &str = "upscale to 8K ultra resolution, enhance quality, improve details \
and clarity, sharpen image";

/// Every capability chain, one per semantic operation
pub struct Catalog {
    pub text: ResilientInvoker,
    pub search: ResilientInvoker,
    pub code: ResilientInvoker,
    pub ocr: ResilientInvoker,
    pub image_generate: ResilientInvoker,
    pub image_edit: ResilientInvoker,
    pub enhance: ResilientInvoker,
    pub video: ResilientInvoker,
    pub translate: ResilientInvoker,
    pub classifier: ResilientInvoker,
    pub books: ResilientInvoker,
}

struct Endpoints<'a> {
    base: &'a str,
    policies: &'a CapabilityPolicies,
    client: Client,
}

impl Endpoints<'_> {
    fn url(&self, file: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), file)
    }

    fn form(&self, name: &str, file: &str, media: Option<MediaField>, format: ResponseFormat, policy: &RetryPolicy) -> HttpCapability {
        HttpCapability::new(
            name,
            self.url(file),
            RequestShape::Form {
                text_field: "text",
                media,
            },
            format,
            policy.clone(),
            self.client.clone(),
        )
    }

    fn links(max: usize) -> Option<MediaField> {
        Some(MediaField { name: "links", max })
    }

    fn link() -> Option<MediaField> {
        Some(MediaField { name: "link", max: 1 })
    }

    fn nano_banana(&self) -> HttpCapability {
        self.form(
            "nano_banana",
            "nano-banana.php",
            Self::links(10),
            ResponseFormat::Url(ResultKind::ImageUrl),
            &self.policies.image_edit_fast,
        )
    }

    fn gpt_imager(&self) -> HttpCapability {
        self.form(
            "gpt_imager",
            "gpt-img.php",
            Self::link(),
            ResponseFormat::Url(ResultKind::ImageUrl),
            &self.policies.image_heavy,
        )
    }

    fn seedream(&self) -> HttpCapability {
        self.form(
            "seedream_4",
            "SeedReam-4.php",
            Self::links(4),
            ResponseFormat::Url(ResultKind::ImageUrl),
            &self.policies.image_heavy,
        )
    }
}

fn chain(name: &str, caps: Vec<Arc<dyn RemoteCapability>>, breaker: &CircuitBreakerConfig) -> ResilientInvoker {
    ResilientInvoker::new(name, caps, breaker)
}

impl Catalog {
    pub fn from_config(config: &BotConfig) -> Self {
        Self::build(
            &config.provider_base_url,
            &config.policies,
            &config.circuit_breaker,
            Client::new(),
        )
    }

    /// Build every chain against `base` (the provider API root)
    pub fn build(
        base: &str,
        policies: &CapabilityPolicies,
        breaker: &CircuitBreakerConfig,
        client: Client,
    ) -> Self {
        let ep = Endpoints {
            base,
            policies,
            client: client.clone(),
        };

        let text = ep.form("grok4", "grok4.php", None, ResponseFormat::Text, &policies.text);
        let classifier = ep
            .form("grok4_classifier", "grok4.php", None, ResponseFormat::Raw, &policies.classifier);
        let search = HttpCapability::new(
            "search",
            ep.url("s.php"),
            RequestShape::Form {
                text_field: "q",
                media: None,
            },
            ResponseFormat::Search,
            policies.search.clone(),
            client.clone(),
        );
        let code = HttpCapability::new(
            "darkcode",
            ep.url("DarkCode.php"),
            RequestShape::Json { text_field: "text" },
            ResponseFormat::Text,
            policies.code.clone(),
            client.clone(),
        );
        let ocr = ep
            .form(
                "ocr",
                "OCR.php",
                Some(MediaField { name: "link", max: 10 }),
                ResponseFormat::Ocr,
                &policies.ocr,
            )
            .with_default_instruction(OCR_INSTRUCTION);
        let img_cv = ep.form(
            "img_cv",
            "img-cv.php",
            None,
            ResponseFormat::Url(ResultKind::ImageUrl),
            &policies.image_fast,
        );
        let flux_pro = ep.form(
            "flux_pro",
            "flux-pro.php",
            None,
            ResponseFormat::Url(ResultKind::ImageUrl),
            &policies.image_heavy,
        );
        let quality = HttpCapability::new(
            "quality_enhancer",
            ep.url("quality.php"),
            RequestShape::QueryLink { field: "link" },
            ResponseFormat::Url(ResultKind::ImageUrl),
            policies.quality.clone(),
            client.clone(),
        );
        let video = ep.form(
            "veo3",
            "veo3.php",
            Endpoints::link(),
            ResponseFormat::Url(ResultKind::VideoUrl),
            &policies.video,
        );

        Self {
            text: chain("text", vec![Arc::new(text)], breaker),
            search: chain("search", vec![Arc::new(search)], breaker),
            code: chain("code", vec![Arc::new(code)], breaker),
            ocr: chain("ocr", vec![Arc::new(ocr)], breaker),
            image_generate: chain(
                "image_generate",
                vec![Arc::new(img_cv), Arc::new(flux_pro)],
                breaker,
            ),
            image_edit: chain(
                "image_edit",
                vec![
                    Arc::new(ep.nano_banana()),
                    Arc::new(ep.gpt_imager()),
                    Arc::new(ep.seedream()),
                ],
                breaker,
            ),
            enhance: chain(
                "enhance",
                vec![
                    Arc::new(quality),
                    Arc::new(ep.nano_banana().with_fixed_instruction(NANO_ENHANCE).with_name("nano_banana_enhance")),
                    Arc::new(ep.gpt_imager().with_fixed_instruction(GPT_ENHANCE).with_name("gpt_imager_enhance")),
                    Arc::new(ep.seedream().with_fixed_instruction(SEEDREAM_ENHANCE).with_name("seedream_4_enhance")),
                ],
                breaker,
            )
            .rejecting_echo(),
            video: chain("video", vec![Arc::new(video)], breaker),
            translate: chain(
                "translate",
                vec![
                    Arc::new(MyMemoryTranslator::new(MYMEMORY_URL, policies.translation.clone(), client.clone())),
                    Arc::new(GoogleTranslator::new(GOOGLE_TRANSLATE_URL, policies.translation.clone(), client.clone())),
                ],
                breaker,
            ),
            classifier: chain("classifier", vec![Arc::new(classifier)], breaker),
            books: chain(
                "books",
                vec![
                    Arc::new(BookSearch::google_books(GOOGLE_BOOKS_URL, policies.books.clone(), client.clone())),
                    Arc::new(BookSearch::open_library(OPEN_LIBRARY_URL, policies.books.clone(), client)),
                ],
                breaker,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order() {
        let catalog = Catalog::build(
            "https://provider.example/api/",
            &CapabilityPolicies::default(),
            &CircuitBreakerConfig::default(),
            Client::new(),
        );

        assert_eq!(
            catalog.image_edit.capability_names(),
            ["nano_banana", "gpt_imager", "seedream_4"]
        );
        assert_eq!(
            catalog.enhance.capability_names(),
            [
                "quality_enhancer",
                "nano_banana_enhance",
                "gpt_imager_enhance",
                "seedream_4_enhance"
            ]
        );
        assert_eq!(catalog.image_generate.capability_names(), ["img_cv", "flux_pro"]);
        assert_eq!(catalog.translate.capability_names(), ["mymemory", "google_translate"]);
    }
}
