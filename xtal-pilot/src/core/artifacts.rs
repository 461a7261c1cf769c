//! Artifact kinds, per-stage input requirements, and output file naming.
//!
//! Every path produced here is relative to the workspace root, so the
//! session file stays valid when the workspace directory moves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::stage::Stage;

/// A category of file a step consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Experiment or datablock description (geometry, crystal model).
    ExperimentDescription,
    /// Reflection table.
    ReflectionData,
    Log,
    DebugLog,
    /// Machine-readable symmetry determination result.
    SymmetryResult,
    Report,
    Predictions,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExperimentDescription => "experiment-description",
            Self::ReflectionData => "reflection-data",
            Self::Log => "log",
            Self::DebugLog => "debug-log",
            Self::SymmetryResult => "symmetry-result",
            Self::Report => "report",
            Self::Predictions => "predictions",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact kinds a stage needs from its parent step before it can run.
///
/// Reindex is the exception twice over: its experiment description comes
/// from the parent's solution files and its reflections come from the
/// step above the parent, so only the parent-side requirement is listed
/// here and the caller checks the grandparent separately.
pub fn required_inputs(stage: Stage) -> &'static [ArtifactKind] {
    match stage {
        Stage::Import => &[],
        Stage::FindSpots => &[ArtifactKind::ExperimentDescription],
        Stage::Reindex => &[ArtifactKind::ExperimentDescription],
        Stage::Index
        | Stage::RefineBravaisSettings
        | Stage::Refine
        | Stage::Integrate
        | Stage::Symmetry
        | Stage::Scale
        | Stage::Export => &[
            ArtifactKind::ExperimentDescription,
            ArtifactKind::ReflectionData,
        ],
    }
}

/// Output files a run of `stage` as step `line_number` will write.
///
/// Reindex registers its experiment description later, once the chosen
/// solution is known, and export produces nothing the tree tracks beyond
/// its logs.
pub fn planned_outputs(
    stage: Stage,
    line_number: u32,
    files_dir: &Path,
) -> BTreeMap<ArtifactKind, PathBuf> {
    let mut outputs = BTreeMap::new();
    if let Some(name) = experiment_file_name(stage, line_number) {
        outputs.insert(ArtifactKind::ExperimentDescription, files_dir.join(name));
    }
    if produces_reflections(stage) {
        outputs.insert(
            ArtifactKind::ReflectionData,
            files_dir.join(reflections_file_name(line_number)),
        );
    }
    if stage != Stage::Reindex {
        outputs.insert(
            ArtifactKind::Log,
            files_dir.join(format!("{line_number}_{stage}.log")),
        );
        outputs.insert(
            ArtifactKind::DebugLog,
            files_dir.join(format!("{line_number}_{stage}.debug.log")),
        );
    }
    if matches!(stage, Stage::Symmetry | Stage::Scale) {
        outputs.insert(
            ArtifactKind::SymmetryResult,
            files_dir.join(format!("{line_number}_{stage}.symmetry.json")),
        );
    }
    outputs
}

/// Experiment description written by the lattice search for one solution.
pub fn reindexed_experiments_path(parent_line: u32, solution: u32, files_dir: &Path) -> PathBuf {
    files_dir.join(format!("{parent_line}_bravais_setting_{solution}.json"))
}

/// Where a failed step's captured output is written.
pub fn error_log_path(line_number: u32, files_dir: &Path) -> PathBuf {
    files_dir.join(format!("{line_number}_error.log"))
}

pub fn reflections_file_name(line_number: u32) -> String {
    format!("{line_number}_reflections.pickle")
}

fn experiment_file_name(stage: Stage, line_number: u32) -> Option<String> {
    match stage {
        Stage::Import | Stage::FindSpots => Some(format!("{line_number}_datablock.json")),
        Stage::Index | Stage::Refine | Stage::Integrate | Stage::Symmetry | Stage::Scale => {
            Some(format!("{line_number}_experiments.json"))
        }
        Stage::RefineBravaisSettings => Some(format!("{line_number}_bravais_summary.json")),
        Stage::Reindex | Stage::Export => None,
    }
}

fn produces_reflections(stage: Stage) -> bool {
    !matches!(
        stage,
        Stage::Import | Stage::RefineBravaisSettings | Stage::Export
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> PathBuf {
        PathBuf::from("pilot_files")
    }

    #[test]
    fn import_outputs_datablock_and_logs_only() {
        let outputs = planned_outputs(Stage::Import, 1, &dir());
        assert_eq!(
            outputs.get(&ArtifactKind::ExperimentDescription),
            Some(&dir().join("1_datablock.json"))
        );
        assert_eq!(outputs.get(&ArtifactKind::ReflectionData), None);
        assert_eq!(
            outputs.get(&ArtifactKind::Log),
            Some(&dir().join("1_import.log"))
        );
        assert_eq!(
            outputs.get(&ArtifactKind::DebugLog),
            Some(&dir().join("1_import.debug.log"))
        );
    }

    #[test]
    fn scale_outputs_include_symmetry_result() {
        let outputs = planned_outputs(Stage::Scale, 9, &dir());
        assert_eq!(
            outputs.get(&ArtifactKind::ExperimentDescription),
            Some(&dir().join("9_experiments.json"))
        );
        assert_eq!(
            outputs.get(&ArtifactKind::ReflectionData),
            Some(&dir().join("9_reflections.pickle"))
        );
        assert_eq!(
            outputs.get(&ArtifactKind::SymmetryResult),
            Some(&dir().join("9_scale.symmetry.json"))
        );
    }

    #[test]
    fn reindex_plans_reflections_but_no_logs_or_experiments() {
        let outputs = planned_outputs(Stage::Reindex, 6, &dir());
        assert_eq!(
            outputs.get(&ArtifactKind::ReflectionData),
            Some(&dir().join("6_reflections.pickle"))
        );
        assert_eq!(outputs.get(&ArtifactKind::ExperimentDescription), None);
        assert_eq!(outputs.get(&ArtifactKind::Log), None);
        assert_eq!(outputs.get(&ArtifactKind::DebugLog), None);
    }

    #[test]
    fn export_plans_logs_only() {
        let outputs = planned_outputs(Stage::Export, 12, &dir());
        assert_eq!(outputs.len(), 2);
        assert!(outputs.contains_key(&ArtifactKind::Log));
        assert!(outputs.contains_key(&ArtifactKind::DebugLog));
    }

    #[test]
    fn input_requirements_match_the_parent_side_contract() {
        assert!(required_inputs(Stage::Import).is_empty());
        assert_eq!(
            required_inputs(Stage::FindSpots),
            &[ArtifactKind::ExperimentDescription]
        );
        assert_eq!(
            required_inputs(Stage::Reindex),
            &[ArtifactKind::ExperimentDescription]
        );
        assert_eq!(
            required_inputs(Stage::Export),
            &[
                ArtifactKind::ExperimentDescription,
                ArtifactKind::ReflectionData,
            ]
        );
    }

    #[test]
    fn solution_experiment_path_uses_the_parent_line() {
        assert_eq!(
            reindexed_experiments_path(5, 2, &dir()),
            dir().join("5_bravais_setting_2.json")
        );
    }
}
