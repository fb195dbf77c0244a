use serde::{Deserialize, Serialize};

/// Custom theme sent with the new-session message.
///
/// Unset options are carried as empty strings. The presence of the record
/// itself is what signals that a theme was configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomTheme {
    pub base: String,
    pub primary_color: String,
    pub background_color: String,
    pub secondary_background_color: String,
    pub text_color: String,
    pub font: String,
}
