//! Voice selection shared by the batch and local speech providers.

/// One voice as reported by a speech provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Provider-specific identifier passed back when synthesizing.
    pub id: String,
    pub name: String,
    /// BCP 47-ish locale, e.g. "en-GB". Providers vary in how strict this is.
    pub locale: String,
}

/// What the user asked for, carried from the CLI into every provider call.
#[derive(Debug, Clone)]
pub struct VoicePreference {
    /// Accent tag such as "uk" or "au". Optional; absent means any voice in
    /// the base language will do.
    pub accent: Option<String>,
    /// Base language used for the locale-prefix fallback, e.g. "en".
    pub language: String,
}

impl Default for VoicePreference {
    fn default() -> Self {
        VoicePreference { accent: None, language: "en".to_string() }
    }
}

/// Synonym terms per accent tag, matched as substrings of voice names.
/// Substring matching is crude; terms go from most to least specific so the
/// short ambiguous ones are tried last.
pub const ACCENT_SYNONYMS: &[(&str, &[&str])] = &[
    ("uk", &["great britain", "british", "england", "uk"]),
    ("us", &["united states", "american", "us"]),
    ("au", &["australian", "australia", "au"]),
    ("in", &["indian", "india"]),
    ("ie", &["irish", "ireland"]),
    ("za", &["south african", "south africa"]),
    ("ca", &["canadian", "canada"]),
];

/// Picks a voice for the given preference.
///
/// Accent synonyms are tried first, in table order, as case-insensitive
/// substrings of voice names. When nothing matches, the first voice whose
/// locale starts with the base language wins. `None` means the caller should
/// let the provider use its default voice.
pub fn select_voice<'v>(
    voices: &'v [VoiceInfo],
    preference: &VoicePreference,
) -> Option<&'v VoiceInfo> {
    if voices.is_empty() {
        return None;
    }

    if let Some(tag) = preference.accent.as_deref() {
        let tag = tag.to_lowercase();
        let terms = ACCENT_SYNONYMS
            .iter()
            .find(|(known, _)| *known == tag)
            .map(|(_, terms)| *terms)
            .unwrap_or(&[]);

        // An unknown tag still gets one shot as a literal term.
        for term in terms.iter().copied().chain(std::iter::once(tag.as_str())) {
            if let Some(voice) =
                voices.iter().find(|v| v.name.to_lowercase().contains(term))
            {
                return Some(voice);
            }
        }
    }

    let base = preference.language.to_lowercase();
    voices.iter().find(|v| v.locale.to_lowercase().starts_with(&base))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: &str, name: &str, locale: &str) -> VoiceInfo {
        VoiceInfo { id: id.to_string(), name: name.to_string(), locale: locale.to_string() }
    }

    fn pref(accent: Option<&str>, language: &str) -> VoicePreference {
        VoicePreference {
            accent: accent.map(str::to_string),
            language: language.to_string(),
        }
    }

    #[test]
    fn matches_accent_synonym_in_name() {
        let voices = vec![
            voice("v1", "Aria", "en-US"),
            voice("v2", "British English Male", "en"),
        ];

        let selected = select_voice(&voices, &pref(Some("uk"), "en"));
        assert_eq!(selected.map(|v| v.id.as_str()), Some("v2"));
    }

    #[test]
    fn earlier_terms_outrank_list_order() {
        // "great britain" is a higher-priority term than "uk", so the second
        // voice wins even though the first also matches the tag.
        let voices = vec![
            voice("v1", "UK North", "en"),
            voice("v2", "English (Great Britain)", "en"),
        ];

        let selected = select_voice(&voices, &pref(Some("uk"), "en"));
        assert_eq!(selected.map(|v| v.id.as_str()), Some("v2"));
    }

    #[test]
    fn falls_back_to_locale_prefix_when_names_do_not_match() {
        let voices = vec![
            voice("v1", "Amelie", "fr-FR"),
            voice("v2", "Daniel", "en-GB"),
        ];

        let selected = select_voice(&voices, &pref(Some("uk"), "en"));
        assert_eq!(selected.map(|v| v.id.as_str()), Some("v2"));
    }

    #[test]
    fn unknown_tag_is_tried_literally() {
        let voices = vec![voice("v1", "Scouse Male", "en-GB")];

        let selected = select_voice(&voices, &pref(Some("scouse"), "en"));
        assert_eq!(selected.map(|v| v.id.as_str()), Some("v1"));
    }

    #[test]
    fn no_match_at_all_returns_none() {
        let voices = vec![voice("v1", "Amelie", "fr-FR")];

        assert!(select_voice(&voices, &pref(Some("uk"), "en")).is_none());
        assert!(select_voice(&[], &pref(None, "en")).is_none());
    }

    #[test]
    fn no_accent_goes_straight_to_locale() {
        let voices = vec![
            voice("v1", "Amelie", "fr-FR"),
            voice("v2", "Aria", "en-US"),
        ];

        let selected = select_voice(&voices, &pref(None, "en"));
        assert_eq!(selected.map(|v| v.id.as_str()), Some("v2"));
    }
}
