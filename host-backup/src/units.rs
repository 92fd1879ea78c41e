//! Units of work (hooks and apps): how they are selected and how each one
//! ends.

use crate::BackupError;

/// Which hooks or apps a request covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    /// None of them
    Skip,
    /// Every available one
    #[default]
    All,
    /// Only these names
    Only(Vec<String>),
}

impl Selection {
    /// Build from the command surface convention: an ignore flag, or a list
    /// of names where an empty list means all.
    pub fn from_request(ignore: bool, names: Vec<String>) -> Self {
        if ignore {
            Selection::Skip
        } else if names.is_empty() {
            Selection::All
        } else {
            Selection::Only(names)
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Selection::Skip)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    /// Split into the selected available names and the requested names that
    /// are not available. Request order is kept and duplicates dropped.
    pub fn resolve(&self, available: &[String]) -> (Vec<String>, Vec<String>) {
        match self {
            Selection::Skip => (Vec::new(), Vec::new()),
            Selection::All => (available.to_vec(), Vec::new()),
            Selection::Only(names) => {
                let mut selected: Vec<String> = Vec::new();
                let mut unknown = Vec::new();
                for name in names {
                    if selected.contains(name) || unknown.contains(name) {
                        continue;
                    }
                    if available.contains(name) {
                        selected.push(name.clone());
                    } else {
                        unknown.push(name.clone());
                    }
                }
                (selected, unknown)
            }
        }
    }
}

/// How one hook or app ended. Unit failures are aggregated by the engines
/// and never abort a session by themselves.
#[derive(Debug)]
pub enum UnitOutcome {
    Succeeded,
    Skipped(String),
    Failed(BackupError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_request() {
        assert_eq!(Selection::from_request(true, names(&["a"])), Selection::Skip);
        assert_eq!(Selection::from_request(false, Vec::new()), Selection::All);
        assert_eq!(
            Selection::from_request(false, names(&["a"])),
            Selection::Only(names(&["a"]))
        );
    }

    #[test]
    fn test_resolve() {
        let available = names(&["conf_ssh", "data_home", "data_mail"]);

        assert_eq!(Selection::Skip.resolve(&available), (Vec::new(), Vec::new()));
        assert_eq!(Selection::All.resolve(&available), (available.clone(), Vec::new()));

        let only = Selection::Only(names(&["data_mail", "nope", "data_mail", "conf_ssh"]));
        assert_eq!(
            only.resolve(&available),
            (names(&["data_mail", "conf_ssh"]), names(&["nope"]))
        );
    }
}
