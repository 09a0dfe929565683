//! mDNS service-name sanitization (spec §6, RFC 6763 + local rules).
//!
//! No file in the retrieval pack implements this — `unicode-normalization`
//! is an ungrounded addition, narrowly justified because the spec names an
//! exact algorithm (NFD decomposition, combining-mark strip) that has no
//! reasonable hand-rolled substitute; see `DESIGN.md`.

use rand::distributions::Alphanumeric;
use rand::Rng;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// `242 - 13`: spec reserves 13 bytes of the 255-byte mDNS instance name
/// budget for the `._oscjson._tcp` suffix appended at advertise time.
const MAX_SANITIZED_LEN: usize = 242 - 13;
const LABEL_MAX_LEN: usize = 63;

fn collapse_dashes(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut prev_dash = false;
    for c in label.chars() {
        if c == '-' {
            if !prev_dash {
                out.push('-');
            }
            prev_dash = true;
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out
}

fn sanitize_label(label: &str) -> String {
    let collapsed = collapse_dashes(label);
    let trimmed = collapsed.trim_matches('-');
    trimmed.chars().take(LABEL_MAX_LEN).collect()
}

fn random_fallback() -> String {
    let suffix: String = rand::thread_rng().sample_iter(&Alphanumeric).take(6).map(char::from).collect();
    format!("OSCQuery-{suffix}")
}

/// Sanitize a user-supplied service name into a valid mDNS instance label.
pub fn sanitize_service_name(input: &str) -> String {
    let decomposed: String = input.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let restricted: String = decomposed.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.').collect();

    let labels: Vec<String> = restricted.split('.').map(sanitize_label).filter(|l| !l.is_empty()).collect();

    let mut name = if labels.is_empty() { random_fallback() } else { labels.join(".") };

    if name.len() > MAX_SANITIZED_LEN {
        name.truncate(MAX_SANITIZED_LEN);
    }
    name.trim_end_matches(['-', '.']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_symbols() {
        assert_eq!(sanitize_service_name("Node*OscQuery şğüıçö"), "NodeOscQuerysguco");
    }

    #[test]
    fn collapses_dash_runs_and_trims_edges() {
        assert_eq!(sanitize_service_name("-foo---bar-"), "foo-bar");
    }

    #[test]
    fn falls_back_when_nothing_survives() {
        let sanitized = sanitize_service_name("!!!");
        assert!(sanitized.starts_with("OSCQuery-"));
    }

    #[test]
    fn truncates_to_budget() {
        let long = "a".repeat(300);
        let sanitized = sanitize_service_name(&long);
        assert_eq!(sanitized.len(), MAX_SANITIZED_LEN);
    }

    #[test]
    fn keeps_plain_ascii_name() {
        assert_eq!(sanitize_service_name("OSCQuery"), "OSCQuery");
    }
}
