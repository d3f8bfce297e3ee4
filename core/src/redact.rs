use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Digit runs shorter than this are left alone (dates, amounts, years).
const MIN_PHONE_DIGITS: usize = 9;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9\-]+(?:\.[a-z0-9\-]+)*\.[a-z]{2,}")
        .expect("valid email regex")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\(?\d[\d\s.\-()/]{6,}\d").expect("valid phone regex")
});

/// Replace email- and phone-shaped substrings with [`REDACTION_MARKER`].
pub fn redact(text: &str) -> String {
    let without_emails = EMAIL_RE.replace_all(text, REDACTION_MARKER);
    PHONE_RE
        .replace_all(&without_emails, |caps: &Captures<'_>| {
            let matched = &caps[0];
            if digit_count(matched) >= MIN_PHONE_DIGITS {
                REDACTION_MARKER.to_string()
            } else {
                matched.to_string()
            }
        })
        .into_owned()
}

/// True if any email- or phone-shaped substring is present.
pub fn contains_sensitive(text: &str) -> bool {
    EMAIL_RE.is_match(text)
        || PHONE_RE
            .find_iter(text)
            .any(|m| digit_count(m.as_str()) >= MIN_PHONE_DIGITS)
}

fn digit_count(value: &str) -> usize {
    value.chars().filter(char::is_ascii_digit).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_redacted() {
        let out = redact("Écrire à marie.dupont+ecole@lycee-exemple.fr pour le dossier");
        assert_eq!(out, "Écrire à [REDACTED] pour le dossier");
        assert!(!contains_sensitive(&out));
    }

    #[test]
    fn phone_numbers_are_redacted() {
        for phone in ["06 12 34 56 78", "+33 6 12 34 56 78", "06.12.34.56.78", "(221) 77-555-1234"] {
            let out = redact(&format!("Appeler le {phone} ce soir"));
            assert_eq!(out, "Appeler le [REDACTED] ce soir", "{phone}");
        }
    }

    #[test]
    fn dates_and_small_numbers_survive() {
        let text = "Conseil le 2024-03-15, moyenne 12.5/20, salle 104";
        assert_eq!(redact(text), text);
        assert!(!contains_sensitive(text));
    }

    #[test]
    fn mixed_text_has_no_sensitive_residue() {
        let text = "contact: a@b.io / 0612345678 / tel +221 77 123 45 67 / z.z@x.co.uk";
        let out = redact(text);
        assert!(!contains_sensitive(&out), "{out}");
        assert_eq!(out.matches(REDACTION_MARKER).count(), 4);
    }
}
