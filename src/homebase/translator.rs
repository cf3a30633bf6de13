//! Datapoint -> status triple translation (table in spec.md §4.D).
//!
//! A pure function, exhaustively unit tested per the Translator totality
//! law (spec.md §8): every non-empty `name` yields a defined `(source, type)`.

/// The `(source, type, value)` a raw datapoint `(name, value)` translates into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub source: String,
    pub entry_type: String,
    pub value: String,
}

pub fn translate(name: &str, value: &str) -> Translated {
    if name == "@keys" {
        return Translated {
            source: "system".to_owned(),
            entry_type: "@keys".to_owned(),
            value: value.to_owned(),
        };
    }

    if let Some(rest) = name.strip_prefix("ess/git/") {
        return Translated {
            source: "git".to_owned(),
            entry_type: rest.to_owned(),
            value: value.to_owned(),
        };
    }

    if name == "ess/obs_active" || name == "ess/in_obs" {
        let normalized = value.parse::<i64>().unwrap_or(0).to_string();
        return Translated {
            source: "ess".to_owned(),
            entry_type: "in_obs".to_owned(),
            value: normalized,
        };
    }

    if let Some((a, rest)) = name.split_once('/') {
        return Translated {
            source: a.to_owned(),
            entry_type: rest.to_owned(),
            value: value.to_owned(),
        };
    }

    Translated {
        source: "system".to_owned(),
        entry_type: name.to_owned(),
        value: value.to_owned(),
    }
}

/// Canonicalize a numeric-looking string to its canonical decimal form,
/// passing through anything that doesn't parse as a number unchanged
/// (spec.md §3 Status Entry).
pub fn canonicalize_numeric(raw: &str) -> String {
    if let Ok(i) = raw.parse::<i64>() {
        return i.to_string();
    }
    if let Ok(f) = raw.parse::<f64>() {
        return f.to_string();
    }
    raw.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_keys_maps_to_system_keys() {
        let t = translate("@keys", "a,b,c");
        assert_eq!(t.source, "system");
        assert_eq!(t.entry_type, "@keys");
        assert_eq!(t.value, "a,b,c");
    }

    #[test]
    fn git_prefix_maps_to_git_source() {
        let t = translate("ess/git/branch", "main");
        assert_eq!(t.source, "git");
        assert_eq!(t.entry_type, "branch");
        assert_eq!(t.value, "main");
    }

    #[test]
    fn obs_active_maps_to_in_obs_with_integer_coercion() {
        let t = translate("ess/obs_active", "1");
        assert_eq!(t.source, "ess");
        assert_eq!(t.entry_type, "in_obs");
        assert_eq!(t.value, "1");

        let t = translate("ess/obs_active", "abc");
        assert_eq!(t.value, "0", "unparsable value coerces to 0");
    }

    #[test]
    fn in_obs_alias_maps_the_same_as_obs_active() {
        let t = translate("ess/in_obs", "1");
        assert_eq!(t.source, "ess");
        assert_eq!(t.entry_type, "in_obs");
    }

    #[test]
    fn generic_slash_path_splits_on_first_slash() {
        let t = translate("ess/subject", "sally");
        assert_eq!(t.source, "ess");
        assert_eq!(t.entry_type, "subject");
        assert_eq!(t.value, "sally");

        let t = translate("system/hostname", "homebase-3");
        assert_eq!(t.source, "system");
        assert_eq!(t.entry_type, "hostname");
    }

    #[test]
    fn bare_name_maps_to_system_source() {
        let t = translate("standalone", "x");
        assert_eq!(t.source, "system");
        assert_eq!(t.entry_type, "standalone");
    }

    #[test]
    fn canonicalize_numeric_normalizes_and_passes_through_non_numbers() {
        assert_eq!(canonicalize_numeric("007"), "7");
        assert_eq!(canonicalize_numeric("3.3"), "3.3");
        assert_eq!(canonicalize_numeric("true"), "true");
    }
}
