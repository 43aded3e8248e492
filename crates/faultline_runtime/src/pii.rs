//! Reversible PII masking. Queries are masked before they reach the model;
//! the per-job mapping unmasks placeholders in the final report. Placeholders
//! are angle-delimited and replaced longest-index-first so `<email_1>` can
//! never partially match inside `<email_10>`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap())
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(?:email|ip)_\d+>").unwrap())
}

/// Mask emails and IPv4 addresses, returning the masked text and the
/// placeholder -> original mapping stored on the job.
pub fn mask(text: &str) -> (String, HashMap<String, String>) {
    let mut mapping: HashMap<String, String> = HashMap::new();
    let mut reverse: HashMap<String, String> = HashMap::new();

    let masked = replace_with(text, email_re(), "email", &mut mapping, &mut reverse);
    let masked = replace_with(&masked, ipv4_re(), "ip", &mut mapping, &mut reverse);

    (masked, mapping)
}

fn replace_with(
    text: &str,
    re: &Regex,
    kind: &str,
    mapping: &mut HashMap<String, String>,
    reverse: &mut HashMap<String, String>,
) -> String {
    let mut counter = mapping.keys().filter(|k| k.contains(kind)).count();
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let original = caps[0].to_string();
        if let Some(existing) = reverse.get(&original) {
            return existing.clone();
        }
        counter += 1;
        let placeholder = format!("<{}_{}>", kind, counter);
        mapping.insert(placeholder.clone(), original.clone());
        reverse.insert(original, placeholder.clone());
        placeholder
    })
    .into_owned()
}

/// Restore originals in model output. Placeholders the mapping does not know
/// are left in place rather than guessed at.
pub fn unmask(text: &str, mapping: &HashMap<String, String>) -> String {
    placeholder_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            mapping
                .get(token)
                .cloned()
                .unwrap_or_else(|| token.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_restores_originals() {
        let input = "user bob@example.com saw 500s from 10.0.4.17 again";
        let (masked, mapping) = mask(input);
        assert!(!masked.contains("bob@example.com"));
        assert!(!masked.contains("10.0.4.17"));
        assert_eq!(unmask(&masked, &mapping), input);
    }

    #[test]
    fn repeated_value_gets_one_placeholder() {
        let input = "a@b.io wrote to a@b.io";
        let (masked, mapping) = mask(input);
        assert_eq!(mapping.len(), 1);
        assert_eq!(masked.matches("<email_1>").count(), 2);
    }

    #[test]
    fn low_index_never_matches_inside_high_index() {
        let mut mapping = HashMap::new();
        for i in 1..=10 {
            mapping.insert(format!("<email_{}>", i), format!("user{}@example.com", i));
        }
        let report = "first <email_1>, tenth <email_10>";
        let restored = unmask(report, &mapping);
        assert_eq!(restored, "first user1@example.com, tenth user10@example.com");
    }

    #[test]
    fn unknown_placeholder_left_alone() {
        let mapping = HashMap::new();
        assert_eq!(unmask("see <email_3>", &mapping), "see <email_3>");
    }
}
