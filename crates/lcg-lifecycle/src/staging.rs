//! Profile change classification.
//!
//! A requested field is *sensitive* only when it is in the closed
//! [`SensitiveField`] set AND the change goes from a non-empty value to a
//! different non-empty value. First-time fills and clears apply immediately.
//! Values equal to the current one are dropped: they are not changes.

use lcg_schemas::SensitiveField;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Applied synchronously, no OTP.
    pub immediate: BTreeMap<String, String>,
    /// Staged behind a `profile_change` OTP.
    pub sensitive: BTreeMap<SensitiveField, String>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.sensitive.is_empty()
    }
}

/// Split `requested` into immediate and OTP-gated changes.
///
/// `current` returns the stored value for a profile key ("" when unset).
pub fn classify<'a, F>(requested: &BTreeMap<String, String>, current: F) -> Classification
where
    F: Fn(&str) -> &'a str,
{
    let mut out = Classification::default();

    for (key, new_value) in requested {
        let new_trimmed = new_value.trim();
        let old = current(key.as_str()).trim();
        if old == new_trimmed {
            continue;
        }

        match SensitiveField::from_key(key) {
            Some(field) if !old.is_empty() && !new_trimmed.is_empty() => {
                out.sensitive.insert(field, new_trimmed.to_string());
            }
            _ => {
                out.immediate.insert(key.clone(), new_trimmed.to_string());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn stored<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> &'a str {
        move |k| {
            pairs
                .iter()
                .find(|(pk, _)| *pk == k)
                .map(|(_, v)| *v)
                .unwrap_or("")
        }
    }

    #[test]
    fn non_empty_to_non_empty_sensitive_change_is_gated() {
        let current = [("first_name", "Ana"), ("city", "Madrid")];
        let c = classify(
            &req(&[("first_name", "Laura"), ("city", "Sevilla")]),
            stored(&current),
        );
        assert_eq!(
            c.sensitive.get(&SensitiveField::FirstName).map(String::as_str),
            Some("Laura")
        );
        assert_eq!(c.immediate.get("city").map(String::as_str), Some("Sevilla"));
        assert!(!c.immediate.contains_key("first_name"));
    }

    #[test]
    fn filling_an_empty_sensitive_field_bypasses_otp() {
        let current: [(&str, &str); 0] = [];
        let c = classify(&req(&[("phone", "+34600000000")]), stored(&current));
        assert!(c.sensitive.is_empty());
        assert_eq!(c.immediate.get("phone").map(String::as_str), Some("+34600000000"));
    }

    #[test]
    fn clearing_a_sensitive_field_bypasses_otp() {
        let current = [("id_number", "X1234567")];
        let c = classify(&req(&[("id_number", "  ")]), stored(&current));
        assert!(c.sensitive.is_empty());
        assert_eq!(c.immediate.get("id_number").map(String::as_str), Some(""));
    }

    #[test]
    fn unchanged_values_are_dropped() {
        let current = [("last_name", "Ruiz"), ("city", "Madrid")];
        let c = classify(
            &req(&[("last_name", "Ruiz "), ("city", "Madrid")]),
            stored(&current),
        );
        assert!(c.is_empty());
    }
}
