//! Subject/session/run selection.
//!
//! A missing or empty filter means "everything". Token format is not checked
//! here; conventions differ per modality and each module validates its own.

/// One dimension of a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    Unrestricted,
    /// Explicit tokens, in the order given. Never empty.
    Only(Vec<String>),
}

impl Filter {
    pub fn resolve(tokens: Option<Vec<String>>) -> Self {
        match tokens {
            Some(tokens) if !tokens.is_empty() => Self::Only(tokens),
            _ => Self::Unrestricted,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// The explicit tokens, or `None` when unrestricted.
    pub fn tokens(&self) -> Option<&[String]> {
        match self {
            Self::Unrestricted => None,
            Self::Only(tokens) => Some(tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Subjects,
    Sessions,
    Runs,
}

/// Resolved filter applied identically to every module in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub subjects: Filter,
    pub sessions: Filter,
    pub runs: Filter,
}

impl Selection {
    pub fn resolve(
        subjects: Option<Vec<String>>,
        sessions: Option<Vec<String>>,
        runs: Option<Vec<String>>,
    ) -> Self {
        Self {
            subjects: Filter::resolve(subjects),
            sessions: Filter::resolve(sessions),
            runs: Filter::resolve(runs),
        }
    }

    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn get(&self, dimension: Dimension) -> &Filter {
        match dimension {
            Dimension::Subjects => &self.subjects,
            Dimension::Sessions => &self.sessions,
            Dimension::Runs => &self.runs,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.subjects.is_unrestricted()
            && self.sessions.is_unrestricted()
            && self.runs.is_unrestricted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(items: &[&str]) -> Option<Vec<String>> {
        Some(items.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn omitted_filters_are_unrestricted_and_stable() {
        let first = Selection::resolve(None, None, None);
        let second = Selection::resolve(None, None, None);
        assert_eq!(first, second);
        assert_eq!(first, Selection::unrestricted());
        assert!(first.is_unrestricted());
    }

    #[test]
    fn empty_list_means_unrestricted() {
        let sel = Selection::resolve(Some(vec![]), tokens(&["1"]), None);
        assert!(sel.subjects.is_unrestricted());
        assert_eq!(sel.sessions.tokens(), Some(&["1".to_string()][..]));
        assert!(!sel.is_unrestricted());
    }

    #[test]
    fn order_and_duplicates_are_kept() {
        let sel = Selection::resolve(tokens(&["P010", "P005", "P010"]), None, None);
        assert_eq!(
            sel.get(Dimension::Subjects),
            &Filter::Only(vec!["P010".into(), "P005".into(), "P010".into()])
        );
    }

    #[test]
    fn tokens_are_not_validated() {
        let sel = Selection::resolve(None, None, tokens(&["run-01", "??", ""]));
        assert_eq!(sel.runs.tokens().map(<[String]>::len), Some(3));
    }
}
