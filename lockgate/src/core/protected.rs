//! Protected-prefix matching for change sets.

use std::collections::HashSet;

/// A changed path that falls under a protected prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub prefix: String,
}

/// Report every changed path that starts with a protected prefix.
///
/// Pure: no I/O. Paths are reported once each, in input order. A leading `./`
/// is ignored so `./Lock/a.md` and `Lock/a.md` are treated alike.
pub fn check_paths<P, Q>(changed: &[P], protected_prefixes: &[Q]) -> Vec<Violation>
where
    P: AsRef<str>,
    Q: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut violations = Vec::new();

    for path in changed {
        let path = normalize(path.as_ref());
        if path.is_empty() || !seen.insert(path) {
            continue;
        }
        let matched = protected_prefixes
            .iter()
            .map(|prefix| prefix.as_ref())
            .find(|prefix| !prefix.is_empty() && path.starts_with(normalize(prefix)));
        if let Some(prefix) = matched {
            violations.push(Violation {
                path: path.to_string(),
                prefix: prefix.to_string(),
            });
        }
    }

    violations
}

fn normalize(path: &str) -> &str {
    path.trim().trim_start_matches("./")
}
