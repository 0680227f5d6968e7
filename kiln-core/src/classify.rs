use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;

use crate::StyleTag;

/// Whole-word trigger vocabulary for the person style. Substrings inside
/// larger words ("mankind") must not match.
const PERSON_WORDS: &str = r"(?i)\b(?:man|person|girl|guy|people|solo)\b";

/// Maps a raw prompt plus the requested checkpoint to a [`StyleTag`].
///
/// Classification is pure and deterministic: the same prompt and model name
/// always select the same decorations and embedding set across runs.
pub struct Classifier {
    anime_models: HashSet<String>,
    person_words: Regex,
}

impl Classifier {
    /// `anime_models` is the deployable list of checkpoints that are always
    /// classified as anime, whatever the prompt says.
    pub fn new(anime_models: impl IntoIterator<Item = String>) -> Result<Self> {
        let person_words =
            Regex::new(PERSON_WORDS).context("failed to compile person vocabulary")?;
        Ok(Self {
            anime_models: anime_models.into_iter().collect(),
            person_words,
        })
    }

    pub fn classify(&self, prompt: &str, model: &str) -> StyleTag {
        if self.anime_models.contains(model) {
            return StyleTag::Anime;
        }
        if self.person_words.is_match(prompt) {
            StyleTag::Person
        } else {
            StyleTag::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(["hassaku".to_string()]).unwrap()
    }

    #[test]
    fn anime_checkpoints_override_prompt_content() {
        let c = classifier();
        assert_eq!(
            c.classify("a scenic mountain landscape", "hassaku"),
            StyleTag::Anime
        );
        assert_eq!(
            c.classify("a portrait of a person smiling", "hassaku"),
            StyleTag::Anime
        );
    }

    #[test]
    fn person_vocabulary_matches_whole_words() {
        let c = classifier();
        assert_eq!(
            c.classify("a portrait of a person smiling", "genericModel"),
            StyleTag::Person
        );
        assert_eq!(c.classify("one girl, reading", "genericModel"), StyleTag::Person);
        assert_eq!(c.classify("solo", "genericModel"), StyleTag::Person);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let c = classifier();
        assert_eq!(c.classify("MAN overboard", "genericModel"), StyleTag::Person);
        assert_eq!(c.classify("People at a market", "genericModel"), StyleTag::Person);
    }

    #[test]
    fn substrings_inside_larger_words_do_not_match() {
        let c = classifier();
        assert_eq!(
            c.classify("mankind and technology", "genericModel"),
            StyleTag::Other
        );
        assert_eq!(c.classify("a germane question", "genericModel"), StyleTag::Other);
        assert_eq!(c.classify("personal effects", "genericModel"), StyleTag::Other);
    }

    #[test]
    fn everything_else_is_other() {
        let c = classifier();
        assert_eq!(
            c.classify("a scenic mountain landscape", "genericModel"),
            StyleTag::Other
        );
        assert_eq!(c.classify("", "genericModel"), StyleTag::Other);
    }
}
