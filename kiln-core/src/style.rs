use serde::{Deserialize, Serialize};

/// Style bucket a request falls into. Selects the prompt decorations below
/// and which auxiliary embedding set the pipeline loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleTag {
    Anime,
    Person,
    Other,
}

serde_plain::derive_display_from_serialize!(StyleTag);
serde_plain::derive_fromstr_from_deserialize!(StyleTag);

const ANIME_POSITIVE: &str = "(score_9, score_8_up, score_7_up, masterpiece, best quality, high quality, ultra highres)1.1, extremely detailed face, detailed facial features, soft lighting, sharp focus, correct anatomy";

const PERSON_POSITIVE: &str = "(score_9, score_8_up, score_7_up, masterpiece, best quality, high quality, ultra highres, ultra-detailed)1.1, extremely detailed face, detailed facial features, soft lighting, sharp focus, correct anatomy";

const OTHER_POSITIVE: &str = "(score_9, score_8_up, score_7_up, masterpiece, best quality, high quality, ultra highres, ultra-detailed)1.1, soft lighting, sharp focus, cinematic, realistic, volumetric dtx, HDR, ue5, octane render engine";

const ANIME_NEGATIVE: &str = "(worst quality, low quality, score_1, score_2, score_3, score_4, score_5, score_6)1.3, (lowres, blurry, jpeg artifacts, extra digit, fewer digits, poorly drawn, cropped image)1.2, monochrome, dehydrated, bad anatomy, bad proportions, malformed limbs, mutated, deformed, disfigured, ugly, extra head, duplicate, extra fingers, disconnected fingers, deformed fingers, fused fingers, bad hands, mutated hands, watermark, artist signature";

const PERSON_NEGATIVE: &str = "(worst quality, low quality, score_1, score_2, score_3, score_4, score_5, score_6)1.3, (monochrome, grayscale, lowres, blurry, jpeg artifacts, extra digit, fewer digits, poorly drawn, simple background, oversaturated, underexposed, cropped image)1.2, bad anatomy, bad proportions, extra limbs, malformed limbs, mutated, deformed, disfigured, ugly, extra fingers, disconnected fingers, deformed fingers, fused fingers, bad hands, mutated hands, watermark, artist signature";

const OTHER_NEGATIVE: &str = "(worst quality, low quality, score_1, score_2, score_3, score_4, score_5, score_6)1.3, (monochrome, grayscale, lowres, blurry, jpeg artifacts, extra digit, fewer digits, poorly drawn, simple background, oversaturated, underexposed, cropped image)1.2";

impl StyleTag {
    pub fn positive_decoration(self) -> &'static str {
        match self {
            StyleTag::Anime => ANIME_POSITIVE,
            StyleTag::Person => PERSON_POSITIVE,
            StyleTag::Other => OTHER_POSITIVE,
        }
    }

    pub fn negative_decoration(self) -> &'static str {
        match self {
            StyleTag::Anime => ANIME_NEGATIVE,
            StyleTag::Person => PERSON_NEGATIVE,
            StyleTag::Other => OTHER_NEGATIVE,
        }
    }
}

/// Final prompt pair handed to the text encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub positive: String,
    pub negative: String,
}

/// Builds the final prompts: decoration first so the style anchors keep the
/// leading token positions, then the caller's text verbatim.
pub fn compose(style: StyleTag, prompt: &str, negative_prompt: &str) -> ComposedPrompt {
    ComposedPrompt {
        positive: format!("{}, {}", style.positive_decoration(), prompt),
        negative: format!("{}, {}", style.negative_decoration(), negative_prompt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STYLES: [StyleTag; 3] = [StyleTag::Anime, StyleTag::Person, StyleTag::Other];

    #[test]
    fn decoration_leads_and_user_text_trails() {
        for style in ALL_STYLES {
            let composed = compose(style, "a red barn", "telephone poles");
            assert!(composed.positive.starts_with(style.positive_decoration()));
            assert!(composed.positive.ends_with("a red barn"));
            assert!(composed.negative.starts_with(style.negative_decoration()));
            assert!(composed.negative.ends_with("telephone poles"));
        }
    }

    #[test]
    fn user_text_is_never_rewritten() {
        let odd = "  (weird:1.4) , trailing  ";
        let composed = compose(StyleTag::Other, odd, odd);
        assert!(composed.positive.ends_with(odd));
        assert!(composed.negative.ends_with(odd));
    }

    #[test]
    fn style_tags_round_trip_as_strings() {
        for style in ALL_STYLES {
            let name = style.to_string();
            assert_eq!(name, name.to_lowercase());
            assert_eq!(name.parse::<StyleTag>().unwrap(), style);
        }
    }
}
