//! Pure resolution of a requested stage into a concrete argument list.
//!
//! Nothing here touches the filesystem. The one piece of argument
//! resolution that needs file contents (the reindex change-of-basis
//! operator) is read by the controller and passed in resolved form.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::artifacts::{
    self, ArtifactKind, planned_outputs, reflections_file_name, required_inputs,
};
use crate::core::stage::Stage;
use crate::error::PilotError;

/// A fully resolved invocation: the argv to hand to the executor and the
/// artifact paths the step should register before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub argv: Vec<String>,
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
}

/// Background artifact generators that run after a successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    Report,
    Predictions,
}

impl AuxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Predictions => "predictions",
        }
    }
}

impl std::fmt::Display for AuxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an import parameter list carries an input path.
///
/// The wrapped tool accepts bare path arguments or `template=` /
/// `directory=` pairs; anything else (`key=value` tuning parameters) does
/// not count as input.
pub fn import_has_input(params: &[String]) -> bool {
    params.iter().any(|p| {
        (!p.is_empty() && !p.contains('='))
            || p.starts_with("template=")
            || p.starts_with("directory=")
    })
}

/// Solution index requested by a reindex command, defaulting to 1.
pub fn reindex_solution(params: &[String]) -> u32 {
    use std::sync::LazyLock;
    static SOLUTION_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"^solution=(\d+)$").unwrap());

    params
        .iter()
        .find_map(|p| SOLUTION_RE.captures(p))
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(1)
}

/// Resolve any stage except reindex.
///
/// `params` are forwarded verbatim between the program name and the
/// resolved `input.*=` / `output.*=` pairs. Fails with `MissingArtifact`
/// when the parent never produced a required input kind.
pub fn resolve_standard(
    stage: Stage,
    line_number: u32,
    params: &[String],
    parent_line: u32,
    parent_artifacts: &BTreeMap<ArtifactKind, PathBuf>,
    files_dir: &Path,
    tool_prefix: &str,
) -> Result<ResolvedCommand, PilotError> {
    let mut inputs = BTreeMap::new();
    for &kind in required_inputs(stage) {
        let path = parent_artifacts
            .get(&kind)
            .ok_or(PilotError::MissingArtifact {
                stage,
                kind,
                from: parent_line,
            })?;
        inputs.insert(kind, path.clone());
    }

    let outputs = planned_outputs(stage, line_number, files_dir);
    let mut argv = vec![format!("{tool_prefix}{stage}")];
    argv.extend(params.iter().cloned());
    push_inputs(&mut argv, stage, &inputs);
    push_outputs(&mut argv, stage, line_number, &outputs, files_dir);

    Ok(ResolvedCommand {
        argv,
        artifacts: outputs,
    })
}

/// Resolve a reindex step once its dynamic pieces are known.
///
/// The user parameters are consumed (the solution index was already taken
/// from them), the reflections come from the grandparent step, and the
/// experiment description is the solution file the lattice search already
/// wrote under the parent's line number.
pub fn resolve_reindex(
    line_number: u32,
    solution: u32,
    change_of_basis: &str,
    parent_line: u32,
    grandparent_reflections: &Path,
    files_dir: &Path,
    tool_prefix: &str,
) -> ResolvedCommand {
    let mut outputs = planned_outputs(Stage::Reindex, line_number, files_dir);
    outputs.insert(
        ArtifactKind::ExperimentDescription,
        artifacts::reindexed_experiments_path(parent_line, solution, files_dir),
    );

    let reflections_out = files_dir.join(reflections_file_name(line_number));
    let argv = vec![
        format!("{tool_prefix}{}", Stage::Reindex),
        format!("input.reflections={}", grandparent_reflections.display()),
        format!("change_of_basis_op={change_of_basis}"),
        format!("output.reflections={}", reflections_out.display()),
    ];

    ResolvedCommand {
        argv,
        artifacts: outputs,
    }
}

/// Resolve a background generator for a finished step, or `None` when the
/// stage does not support it.
///
/// Reports need the step's reflection data; predictions need a real
/// experiment description, which exists from indexing onward.
pub fn resolve_aux(
    kind: AuxKind,
    stage: Stage,
    line_number: u32,
    step_artifacts: &BTreeMap<ArtifactKind, PathBuf>,
    files_dir: &Path,
    tool_prefix: &str,
) -> Option<ResolvedCommand> {
    match kind {
        AuxKind::Report => {
            let reflections = step_artifacts.get(&ArtifactKind::ReflectionData)?;
            let html = files_dir.join(format!("{line_number}_report.html"));
            let mut argv = vec![format!("{tool_prefix}report")];
            if stage != Stage::FindSpots
                && let Some(experiments) = step_artifacts.get(&ArtifactKind::ExperimentDescription)
            {
                argv.push(experiments.display().to_string());
            }
            argv.push(reflections.display().to_string());
            argv.push(format!("output.html={}", html.display()));
            Some(ResolvedCommand {
                argv,
                artifacts: BTreeMap::from([(ArtifactKind::Report, html)]),
            })
        }
        AuxKind::Predictions => {
            if matches!(stage, Stage::Import | Stage::FindSpots | Stage::Export) {
                return None;
            }
            let experiments = step_artifacts.get(&ArtifactKind::ExperimentDescription)?;
            if stage == Stage::RefineBravaisSettings {
                // Its experiment description is a solution summary, not a
                // model the predictor can consume.
                return None;
            }
            let pickle = files_dir.join(format!("{line_number}_predict.pickle"));
            let argv = vec![
                format!("{tool_prefix}predict"),
                experiments.display().to_string(),
                format!("output={}", pickle.display()),
            ];
            Some(ResolvedCommand {
                argv,
                artifacts: BTreeMap::from([(ArtifactKind::Predictions, pickle)]),
            })
        }
    }
}

fn push_inputs(argv: &mut Vec<String>, stage: Stage, inputs: &BTreeMap<ArtifactKind, PathBuf>) {
    let experiments = inputs.get(&ArtifactKind::ExperimentDescription);
    let reflections = inputs.get(&ArtifactKind::ReflectionData);
    match stage {
        Stage::Import => {}
        // Resolved by resolve_reindex, never routed here.
        Stage::Reindex => {}
        Stage::Export => {
            if let Some(path) = experiments {
                argv.push(path.display().to_string());
            }
            if let Some(path) = reflections {
                argv.push(path.display().to_string());
            }
        }
        Stage::FindSpots | Stage::Index => {
            if let Some(path) = experiments {
                argv.push(format!("input.datablock={}", path.display()));
            }
            if let Some(path) = reflections {
                argv.push(format!("input.reflections={}", path.display()));
            }
        }
        _ => {
            if let Some(path) = experiments {
                argv.push(format!("input.experiments={}", path.display()));
            }
            if let Some(path) = reflections {
                argv.push(format!("input.reflections={}", path.display()));
            }
        }
    }
}

fn push_outputs(
    argv: &mut Vec<String>,
    stage: Stage,
    line_number: u32,
    outputs: &BTreeMap<ArtifactKind, PathBuf>,
    files_dir: &Path,
) {
    if stage == Stage::RefineBravaisSettings {
        // The lattice search names its own files from a prefix.
        argv.push(format!("output.prefix={line_number}_"));
        argv.push(format!("output.directory={}", files_dir.display()));
    } else {
        if let Some(path) = outputs.get(&ArtifactKind::ExperimentDescription) {
            let key = match stage {
                Stage::Import | Stage::FindSpots => "output.datablock",
                _ => "output.experiments",
            };
            argv.push(format!("{key}={}", path.display()));
        }
        if let Some(path) = outputs.get(&ArtifactKind::ReflectionData) {
            argv.push(format!("output.reflections={}", path.display()));
        }
        if stage == Stage::Integrate {
            let phil = files_dir.join(format!("{line_number}_integrate.phil"));
            argv.push(format!("output.phil={}", phil.display()));
        }
        if let Some(path) = outputs.get(&ArtifactKind::SymmetryResult) {
            argv.push(format!("output.json={}", path.display()));
        }
    }
    if let Some(path) = outputs.get(&ArtifactKind::Log) {
        argv.push(format!("output.log={}", path.display()));
    }
    if let Some(path) = outputs.get(&ArtifactKind::DebugLog) {
        // The scaling tool spells this one differently.
        let key = if stage == Stage::Scale {
            "output.debug.log"
        } else {
            "output.debug_log"
        };
        argv.push(format!("{key}={}", path.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> PathBuf {
        PathBuf::from("pilot_files")
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn import_detects_input_parameters() {
        assert!(import_has_input(&strings(&["/data/run7/img_0001.cbf"])));
        assert!(import_has_input(&strings(&["template=/data/img_####.cbf"])));
        assert!(import_has_input(&strings(&["directory=/data/run7"])));
        assert!(!import_has_input(&strings(&["slow_fast_beam_centre=12,34"])));
        assert!(!import_has_input(&[]));
    }

    #[test]
    fn solution_parameter_parses_with_default() {
        assert_eq!(reindex_solution(&strings(&["solution=3"])), 3);
        assert_eq!(reindex_solution(&strings(&["solution=abc"])), 1);
        assert_eq!(reindex_solution(&[]), 1);
    }

    #[test]
    fn import_argv_has_no_input_pairs() {
        let resolved = resolve_standard(
            Stage::Import,
            1,
            &strings(&["/data/run7/img_0001.cbf"]),
            0,
            &BTreeMap::new(),
            &dir(),
            "dials.",
        )
        .unwrap();
        assert_eq!(
            resolved.argv,
            strings(&[
                "dials.import",
                "/data/run7/img_0001.cbf",
                "output.datablock=pilot_files/1_datablock.json",
                "output.log=pilot_files/1_import.log",
                "output.debug_log=pilot_files/1_import.debug.log",
            ])
        );
    }

    #[test]
    fn find_spots_consumes_the_parent_datablock() {
        let parent = BTreeMap::from([(
            ArtifactKind::ExperimentDescription,
            dir().join("1_datablock.json"),
        )]);
        let resolved = resolve_standard(
            Stage::FindSpots,
            2,
            &strings(&["sigma_strong=2.5"]),
            1,
            &parent,
            &dir(),
            "dials.",
        )
        .unwrap();
        assert_eq!(
            resolved.argv,
            strings(&[
                "dials.find_spots",
                "sigma_strong=2.5",
                "input.datablock=pilot_files/1_datablock.json",
                "output.datablock=pilot_files/2_datablock.json",
                "output.reflections=pilot_files/2_reflections.pickle",
                "output.log=pilot_files/2_find_spots.log",
                "output.debug_log=pilot_files/2_find_spots.debug.log",
            ])
        );
    }

    #[test]
    fn missing_parent_artifact_is_a_typed_failure() {
        let err = resolve_standard(
            Stage::FindSpots,
            2,
            &[],
            1,
            &BTreeMap::new(),
            &dir(),
            "dials.",
        )
        .unwrap_err();
        assert_eq!(
            err,
            PilotError::MissingArtifact {
                stage: Stage::FindSpots,
                kind: ArtifactKind::ExperimentDescription,
                from: 1,
            }
        );
    }

    #[test]
    fn bravais_search_uses_prefix_and_directory() {
        let parent = BTreeMap::from([
            (
                ArtifactKind::ExperimentDescription,
                dir().join("3_experiments.json"),
            ),
            (
                ArtifactKind::ReflectionData,
                dir().join("3_reflections.pickle"),
            ),
        ]);
        let resolved = resolve_standard(
            Stage::RefineBravaisSettings,
            4,
            &[],
            3,
            &parent,
            &dir(),
            "dials.",
        )
        .unwrap();
        assert_eq!(
            resolved.argv,
            strings(&[
                "dials.refine_bravais_settings",
                "input.experiments=pilot_files/3_experiments.json",
                "input.reflections=pilot_files/3_reflections.pickle",
                "output.prefix=4_",
                "output.directory=pilot_files",
                "output.log=pilot_files/4_refine_bravais_settings.log",
                "output.debug_log=pilot_files/4_refine_bravais_settings.debug.log",
            ])
        );
        assert_eq!(
            resolved.artifacts.get(&ArtifactKind::ExperimentDescription),
            Some(&dir().join("4_bravais_summary.json"))
        );
    }

    #[test]
    fn scale_spells_its_debug_log_with_dots() {
        let parent = BTreeMap::from([
            (
                ArtifactKind::ExperimentDescription,
                dir().join("7_experiments.json"),
            ),
            (
                ArtifactKind::ReflectionData,
                dir().join("7_reflections.pickle"),
            ),
        ]);
        let resolved =
            resolve_standard(Stage::Scale, 8, &[], 7, &parent, &dir(), "dials.").unwrap();
        let argv = resolved.argv.join(" ");
        assert!(argv.contains("output.json=pilot_files/8_scale.symmetry.json"));
        assert!(argv.contains("output.debug.log=pilot_files/8_scale.debug.log"));
        assert!(!argv.contains("output.debug_log="));
    }

    #[test]
    fn integrate_emits_a_phil_dump_without_registering_it() {
        let parent = BTreeMap::from([
            (
                ArtifactKind::ExperimentDescription,
                dir().join("5_experiments.json"),
            ),
            (
                ArtifactKind::ReflectionData,
                dir().join("5_reflections.pickle"),
            ),
        ]);
        let resolved =
            resolve_standard(Stage::Integrate, 6, &[], 5, &parent, &dir(), "dials.").unwrap();
        assert!(
            resolved
                .argv
                .contains(&"output.phil=pilot_files/6_integrate.phil".to_string())
        );
        assert!(
            !resolved
                .artifacts
                .values()
                .any(|p| p.to_string_lossy().contains(".phil"))
        );
    }

    #[test]
    fn export_consumes_parent_files_positionally() {
        let parent = BTreeMap::from([
            (
                ArtifactKind::ExperimentDescription,
                dir().join("9_experiments.json"),
            ),
            (
                ArtifactKind::ReflectionData,
                dir().join("9_reflections.pickle"),
            ),
        ]);
        let resolved =
            resolve_standard(Stage::Export, 10, &[], 9, &parent, &dir(), "dials.").unwrap();
        assert_eq!(
            resolved.argv,
            strings(&[
                "dials.export",
                "pilot_files/9_experiments.json",
                "pilot_files/9_reflections.pickle",
                "output.log=pilot_files/10_export.log",
                "output.debug_log=pilot_files/10_export.debug.log",
            ])
        );
    }

    #[test]
    fn reindex_reaches_two_levels_up() {
        let resolved = resolve_reindex(
            6,
            2,
            "a,b,c",
            5,
            &dir().join("4_reflections.pickle"),
            &dir(),
            "dials.",
        );
        assert_eq!(
            resolved.argv,
            strings(&[
                "dials.reindex",
                "input.reflections=pilot_files/4_reflections.pickle",
                "change_of_basis_op=a,b,c",
                "output.reflections=pilot_files/6_reflections.pickle",
            ])
        );
        assert_eq!(
            resolved.artifacts.get(&ArtifactKind::ExperimentDescription),
            Some(&dir().join("5_bravais_setting_2.json"))
        );
        assert_eq!(
            resolved.artifacts.get(&ArtifactKind::ReflectionData),
            Some(&dir().join("6_reflections.pickle"))
        );
    }

    #[test]
    fn report_skips_the_experiment_argument_for_spot_finding() {
        let step = BTreeMap::from([
            (
                ArtifactKind::ExperimentDescription,
                dir().join("2_datablock.json"),
            ),
            (
                ArtifactKind::ReflectionData,
                dir().join("2_reflections.pickle"),
            ),
        ]);
        let resolved =
            resolve_aux(AuxKind::Report, Stage::FindSpots, 2, &step, &dir(), "dials.").unwrap();
        assert_eq!(
            resolved.argv,
            strings(&[
                "dials.report",
                "pilot_files/2_reflections.pickle",
                "output.html=pilot_files/2_report.html",
            ])
        );
    }

    #[test]
    fn aux_generation_is_gated_by_stage() {
        let empty = BTreeMap::new();
        assert!(resolve_aux(AuxKind::Report, Stage::Import, 1, &empty, &dir(), "dials.").is_none());
        assert!(
            resolve_aux(AuxKind::Predictions, Stage::FindSpots, 2, &empty, &dir(), "dials.")
                .is_none()
        );

        let step = BTreeMap::from([(
            ArtifactKind::ExperimentDescription,
            dir().join("3_experiments.json"),
        )]);
        let resolved =
            resolve_aux(AuxKind::Predictions, Stage::Index, 3, &step, &dir(), "dials.").unwrap();
        assert_eq!(
            resolved.argv,
            strings(&[
                "dials.predict",
                "pilot_files/3_experiments.json",
                "output=pilot_files/3_predict.pickle",
            ])
        );
        assert_eq!(
            resolved.artifacts.get(&ArtifactKind::Predictions),
            Some(&dir().join("3_predict.pickle"))
        );
    }
}
