//! Pipeline stage names and the legal-successor table.

use std::fmt;

/// One step type of the wrapped data-reduction suite.
///
/// The spelling returned by [`Stage::as_str`] is the suite's own command
/// naming (`find_spots`, `refine_bravais_settings`, ...) and is what appears
/// as `command[0]` on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Import,
    FindSpots,
    Index,
    RefineBravaisSettings,
    Reindex,
    Refine,
    Integrate,
    Symmetry,
    Scale,
    Export,
}

/// Every stage, in canonical pipeline order.
pub const ALL_STAGES: [Stage; 10] = [
    Stage::Import,
    Stage::FindSpots,
    Stage::Index,
    Stage::RefineBravaisSettings,
    Stage::Reindex,
    Stage::Refine,
    Stage::Integrate,
    Stage::Symmetry,
    Stage::Scale,
    Stage::Export,
];

/// Stages runnable directly under the synthetic root.
pub const ROOT_SUCCESSORS: &[Stage] = &[Stage::Import];

impl Stage {
    /// Parse the suite spelling of a stage name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "import" => Some(Self::Import),
            "find_spots" => Some(Self::FindSpots),
            "index" => Some(Self::Index),
            "refine_bravais_settings" => Some(Self::RefineBravaisSettings),
            "reindex" => Some(Self::Reindex),
            "refine" => Some(Self::Refine),
            "integrate" => Some(Self::Integrate),
            "symmetry" => Some(Self::Symmetry),
            "scale" => Some(Self::Scale),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::FindSpots => "find_spots",
            Self::Index => "index",
            Self::RefineBravaisSettings => "refine_bravais_settings",
            Self::Reindex => "reindex",
            Self::Refine => "refine",
            Self::Integrate => "integrate",
            Self::Symmetry => "symmetry",
            Self::Scale => "scale",
            Self::Export => "export",
        }
    }

    /// Stages that may run as a child of this one.
    ///
    /// `refine_bravais_settings` has exactly one continuation (reindex),
    /// and reindex appears in no other successor set, so the
    /// summary-JSON/change-of-basis chain is always a
    /// refine_bravais_settings parent with a reindex child.
    pub fn successors(self) -> &'static [Stage] {
        match self {
            Self::Import => &[Self::FindSpots],
            Self::FindSpots => &[Self::Index],
            Self::Index => &[
                Self::RefineBravaisSettings,
                Self::Refine,
                Self::Integrate,
                Self::Export,
            ],
            Self::RefineBravaisSettings => &[Self::Reindex],
            Self::Reindex => &[Self::Refine, Self::Integrate, Self::Export, Self::Index],
            Self::Refine => &[
                Self::RefineBravaisSettings,
                Self::Refine,
                Self::Integrate,
                Self::Index,
                Self::Export,
            ],
            Self::Integrate => &[Self::Symmetry, Self::Scale, Self::Export, Self::Index],
            Self::Symmetry => &[Self::RefineBravaisSettings, Self::Scale, Self::Export],
            Self::Scale => &[Self::RefineBravaisSettings, Self::Symmetry, Self::Export],
            Self::Export => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_stage() {
        for stage in ALL_STAGES {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("Root"), None);
        assert_eq!(Stage::parse("polish"), None);
    }

    #[test]
    fn reindex_only_follows_refine_bravais_settings() {
        assert_eq!(Stage::RefineBravaisSettings.successors(), &[Stage::Reindex]);
        for stage in ALL_STAGES {
            if stage != Stage::RefineBravaisSettings {
                assert!(!stage.successors().contains(&Stage::Reindex));
            }
        }
    }

    #[test]
    fn export_is_terminal() {
        assert!(Stage::Export.successors().is_empty());
        for stage in ALL_STAGES {
            if stage != Stage::Export {
                assert!(!stage.successors().is_empty());
            }
        }
    }

    #[test]
    fn only_import_follows_the_root() {
        assert_eq!(ROOT_SUCCESSORS, &[Stage::Import]);
        for stage in ALL_STAGES {
            assert!(!stage.successors().contains(&Stage::Import));
        }
    }
}
