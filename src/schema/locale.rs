use std::collections::HashMap;

/// Localized label table for one key.
///
/// Resolution is strict: a non-empty locale tag only ever matches its own
/// entry, and the unlocalized default is returned only for the empty tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocaleText {
    default: Option<String>,
    translations: HashMap<String, String>,
}

impl LocaleText {
    /// Registers `text` for `locale`; the empty tag sets the unlocalized default.
    pub fn insert(&mut self, locale: &str, text: impl Into<String>) {
        if locale.is_empty() {
            self.default = Some(text.into());
        } else {
            self.translations.insert(locale.to_string(), text.into());
        }
    }

    /// Resolves the label for `locale`, or the empty string when none matches.
    pub fn resolve(&self, locale: &str) -> &str {
        let entry = if locale.is_empty() {
            self.default.as_ref()
        } else {
            self.translations.get(locale)
        };

        entry.map_or("", String::as_str)
    }

    /// Locale tags with a registered translation.
    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.translations.keys().map(String::as_str)
    }

    /// Whether neither a default nor any translation is registered.
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.translations.is_empty()
    }
}
