/// Splits text into lowercase word tokens.
///
/// A word is a maximal run of alphanumeric characters or `_`; everything else
/// separates words.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::tokenize;

    #[test]
    fn lowercases_and_drops_punctuation() {
        assert_eq!(
            tokenize("Grace period: 30 days, per Policy_A!"),
            vec!["grace", "period", "30", "days", "per", "policy_a"]
        );
    }

    #[test]
    fn blank_text_has_no_tokens() {
        assert!(tokenize("  \n\t ... ").is_empty());
    }

    #[test]
    fn keeps_non_ascii_letters() {
        assert_eq!(tokenize("Ärzte-Kammer"), vec!["ärzte", "kammer"]);
    }

    proptest! {
        #[test]
        fn tokens_are_never_empty_and_contain_no_whitespace(input in ".{0,64}") {
            for token in tokenize(&input) {
                prop_assert!(!token.is_empty());
                prop_assert!(!token.chars().any(char::is_whitespace));
            }
        }
    }
}
