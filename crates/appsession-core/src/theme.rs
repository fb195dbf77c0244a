//! Custom theme population from the `[theme]` config section.

use appsession_types::CustomTheme;
use tracing::warn;

use crate::config::SectionOptions;

/// Theme option names as they appear in the `[theme]` section.
pub const THEME_OPTIONS: [&str; 6] = [
    "base",
    "primaryColor",
    "backgroundColor",
    "secondaryBackgroundColor",
    "textColor",
    "font",
];

pub const ALLOWED_BASES: &[&str] = &["light", "dark"];
pub const ALLOWED_FONTS: &[&str] = &["sans serif", "serif", "monospace"];

const DEFAULT_BASE: &str = "light";
const DEFAULT_FONT: &str = "sans serif";

/// Builds the custom theme record, or `None` when no theme option is set.
///
/// Invalid `base`/`font` values are logged and replaced by their defaults.
/// Options left unset become empty strings.
pub fn populate_custom_theme(options: &SectionOptions) -> Option<CustomTheme> {
    let value = |name: &str| -> Option<String> {
        options.get(name).map(|value| match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        })
    };

    if THEME_OPTIONS.iter().all(|name| value(name).is_none()) {
        return None;
    }

    let base = value("base").map(|base| validated("base", base, ALLOWED_BASES, DEFAULT_BASE));
    let font = value("font").map(|font| validated("font", font, ALLOWED_FONTS, DEFAULT_FONT));

    Some(CustomTheme {
        base: base.unwrap_or_default(),
        primary_color: value("primaryColor").unwrap_or_default(),
        background_color: value("backgroundColor").unwrap_or_default(),
        secondary_background_color: value("secondaryBackgroundColor").unwrap_or_default(),
        text_color: value("textColor").unwrap_or_default(),
        font: font.unwrap_or_default(),
    })
}

fn validated(name: &str, value: String, allowed: &[&str], default: &str) -> String {
    if allowed.contains(&value.as_str()) {
        return value;
    }

    warn!(
        "\"{value}\" is an invalid value for theme.{name}. \
         Allowed values include {allowed:?}. Setting theme.{name} to \"{default}\"."
    );
    default.to_string()
}
