use crate::extractor::Token;
use regex::bytes::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// The command shape a candidate was recognized as.
///
/// Variants are listed in matching priority: the first rule a token satisfies
/// decides how it is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Shape {
    Oem,
    Getvar,
    Flashing,
    Flash,
    Generic,
}

impl Shape {
    /// The literal verb of a fixed-prefix shape. `None` for [`Shape::Generic`].
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            Shape::Oem => Some("oem"),
            Shape::Getvar => Some("getvar"),
            Shape::Flashing => Some("flashing"),
            Shape::Flash => Some("flash"),
            Shape::Generic => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().unwrap_or("generic"))
    }
}

// Verb, then `:` or space, then at least one more byte.
static PREFIX_RULES: LazyLock<[(Shape, Regex); 4]> = LazyLock::new(|| {
    [Shape::Oem, Shape::Getvar, Shape::Flashing, Shape::Flash].map(|shape| {
        let verb = shape.prefix().unwrap_or_default();
        let pattern = format!("(?s-u)^{verb}[: ].");
        (shape, compile(&pattern))
    })
});

static GENERIC_RULE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?-u)^[a-z]{3,15}(:([a-zA-Z_]*))?$"));

pub(crate) fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => panic!("built-in classifier pattern {pattern:?} is invalid: {e}"),
    }
}

/// Returns the first shape `token` matches, in priority order.
pub fn classify(token: &[u8]) -> Option<Shape> {
    PREFIX_RULES
        .iter()
        .find(|(_, rule)| rule.is_match(token))
        .map(|(shape, _)| *shape)
        .or_else(|| GENERIC_RULE.is_match(token).then_some(Shape::Generic))
}

pub fn is_candidate(token: &[u8]) -> bool {
    classify(token).is_some()
}

/// A token that matched one of the known command shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    token: Token,
    shape: Shape,
}

impl Candidate {
    /// Classifies `token`, keeping it only if it matches a shape.
    pub fn from_token(token: Token) -> Option<Self> {
        let shape = classify(token.as_bytes())?;
        Some(Candidate { token, shape })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.token.as_bytes()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.token, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prefixes_are_candidates() {
        assert!(is_candidate(b"oem unlock"));
        assert!(is_candidate(b"getvar:version"));
        assert!(is_candidate(b"flash:boot"));
        assert!(is_candidate(b"flashing lock_critical"));
    }

    #[test]
    fn prefix_rule_picks_the_first_matching_verb() {
        assert_eq!(classify(b"oem unlock"), Some(Shape::Oem));
        assert_eq!(classify(b"getvar:version"), Some(Shape::Getvar));
        assert_eq!(classify(b"flashing:lock"), Some(Shape::Flashing));
        assert_eq!(classify(b"flash:boot"), Some(Shape::Flash));
    }

    #[test]
    fn prefix_rule_needs_a_separator_and_a_following_byte() {
        // Falls through to the generic rule.
        assert_eq!(classify(b"oem:"), Some(Shape::Generic));
        assert_eq!(classify(b"oem "), None);
        assert_eq!(classify(b"oemunlock"), Some(Shape::Generic));
        assert_eq!(classify(b"flash-all"), None);
    }

    #[test]
    fn prefix_rule_accepts_any_trailing_bytes() {
        assert_eq!(classify(b"oem set-config 0x10 !"), Some(Shape::Oem));
        assert_eq!(classify(b"getvar:max-download-size"), Some(Shape::Getvar));
    }

    #[test]
    fn generic_rule_matches_short_lowercase_verbs() {
        assert_eq!(classify(b"continue"), Some(Shape::Generic));
        assert_eq!(classify(b"set_active:a"), None);
        assert_eq!(classify(b"boot:"), Some(Shape::Generic));
        assert_eq!(classify(b"erase:system"), Some(Shape::Generic));
        assert_eq!(classify(b"upload:Some_Thing"), Some(Shape::Generic));
    }

    #[test]
    fn generic_rule_is_anchored_and_length_bounded() {
        assert!(!is_candidate(b"ab"));
        assert!(is_candidate(b"abcdefghijklmno"));
        assert!(!is_candidate(b"abcdefghijklmnop"));
        assert!(!is_candidate(b"abcdefghijklmnopqrst"));
        assert!(!is_candidate(b"Reboot"));
        assert!(!is_candidate(b"reboot bootloader"));
        assert!(!is_candidate(b"download:0x1000"));
    }

    #[test]
    fn empty_token_is_not_a_candidate() {
        assert!(!is_candidate(b""));
        assert!(Candidate::from_token(Token::default()).is_none());
    }

    #[test]
    fn candidate_keeps_token_and_shape() {
        let candidate = Candidate::from_token(Token::new(b"getvar:all".to_vec())).unwrap();
        assert_eq!(candidate.shape(), Shape::Getvar);
        assert_eq!(candidate.as_bytes(), b"getvar:all");
        assert_eq!(candidate.to_string(), "getvar:all");
    }
}
