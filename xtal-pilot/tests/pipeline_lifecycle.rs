//! End-to-end session walks: run stages, rewind, branch, reindex, and
//! restore, with every external tool scripted.

use std::path::PathBuf;

use xtal_pilot::controller::{RunController, StepOutcome};
use xtal_pilot::core::artifacts::ArtifactKind;
use xtal_pilot::io::workspace::Workspace;
use xtal_pilot::render::HistoryRenderer;
use xtal_pilot::test_support::{ScriptedExecutor, ScriptedRun, strings, temp_workspace};
use xtal_pilot::tree::StepStatus;

fn run_stage(
    controller: &mut RunController<ScriptedExecutor>,
    stage: &str,
    params: &[&str],
) -> StepOutcome {
    controller
        .run(stage, strings(params), |_| {})
        .unwrap_or_else(|err| panic!("run {stage}: {err:#}"))
}

#[test]
fn rewind_and_rerun_makes_a_sibling_and_keeps_the_first_attempt() {
    let (temp, workspace) = temp_workspace().expect("workspace");
    let executor = ScriptedExecutor::new(vec![
        ScriptedRun::success().with_lines(&["imported 120 images"]),
        ScriptedRun::success(),
        ScriptedRun::success(),
    ]);
    let mut controller = RunController::open(workspace, executor).expect("open controller");

    let mut seen = Vec::new();
    let outcome = controller
        .run("import", strings(&["/data/run7/img_0001.cbf"]), |line| {
            seen.push(line.to_string())
        })
        .expect("import");
    assert_eq!(outcome.line_number, 1);
    assert_eq!(outcome.status, StepStatus::Succeeded);
    assert_eq!(seen, vec!["imported 120 images".to_string()]);

    let outcome = run_stage(&mut controller, "find_spots", &[]);
    assert_eq!(outcome.line_number, 2);

    // Rewind to the import and try spot finding again with other knobs.
    controller.goto(1).expect("goto 1");
    let outcome = run_stage(&mut controller, "find_spots", &["sigma_strong=2.5"]);
    assert_eq!(outcome.line_number, 3);
    assert_eq!(controller.tree().current_line(), 3);

    // The first attempt is untouched beside the new one.
    let first = controller.tree().node(2).expect("step 2");
    assert_eq!(first.status, StepStatus::Succeeded);
    assert_eq!(first.command, strings(&["find_spots"]));
    assert_eq!(controller.tree().node(1).expect("step 1").children, vec![2, 3]);

    let listing = HistoryRenderer::default().render(controller.tree());
    assert!(listing.contains("\\___find_spots sigma_strong=2.5   <<< here"));

    // A fresh controller over the same directory sees the same tree.
    let reopened = Workspace::open(temp.path()).expect("reopen workspace");
    let restored =
        RunController::open(reopened, ScriptedExecutor::default()).expect("reopen controller");
    assert_eq!(restored.tree(), controller.tree());
}

#[test]
fn branching_fills_a_placeholder_in_place() {
    let (_temp, workspace) = temp_workspace().expect("workspace");
    let executor = ScriptedExecutor::new(vec![
        ScriptedRun::success(),
        ScriptedRun::success(),
        ScriptedRun::success(),
    ]);
    let mut controller = RunController::open(workspace, executor).expect("open controller");

    run_stage(&mut controller, "import", &["/data/x.cbf"]);
    run_stage(&mut controller, "find_spots", &[]);

    let placeholder = controller.branch().expect("branch");
    assert_eq!(placeholder, 3);
    assert_eq!(controller.tree().current_line(), 3);
    assert!(controller.tree().node(3).expect("step 3").command.is_empty());

    // Running now overwrites the placeholder instead of nesting deeper.
    let outcome = run_stage(&mut controller, "find_spots", &["nproc=8"]);
    assert_eq!(outcome.line_number, 3);
    assert_eq!(
        controller.tree().node(3).expect("step 3").command,
        strings(&["find_spots", "nproc=8"])
    );
    assert_eq!(controller.tree().node(1).expect("step 1").children, vec![2, 3]);
    assert_eq!(controller.tree().step_count(), 4);
}

#[test]
fn the_full_reduction_chain_carries_artifacts_forward() {
    let (_temp, workspace) = temp_workspace().expect("workspace");
    let executor = ScriptedExecutor::new(vec![ScriptedRun::success(); 8]);
    let mut controller = RunController::open(workspace, executor).expect("open controller");

    for (stage, params) in [
        ("import", vec!["/data/run7/img_0001.cbf"]),
        ("find_spots", vec![]),
        ("index", vec![]),
        ("refine", vec![]),
        ("integrate", vec!["nproc=4"]),
        ("symmetry", vec![]),
        ("scale", vec![]),
        ("export", vec![]),
    ] {
        let outcome = run_stage(&mut controller, stage, &params);
        assert_eq!(outcome.status, StepStatus::Succeeded, "{stage}");
    }
    assert_eq!(controller.tree().current_line(), 8);

    let integrate = controller.tree().node(5).expect("integrate step");
    assert_eq!(
        integrate.artifacts.get(&ArtifactKind::ExperimentDescription),
        Some(&PathBuf::from("pilot_files/5_experiments.json"))
    );
    assert_eq!(
        integrate.artifacts.get(&ArtifactKind::ReflectionData),
        Some(&PathBuf::from("pilot_files/5_reflections.pickle"))
    );

    let scale = controller.tree().node(7).expect("scale step");
    assert_eq!(
        scale.artifacts.get(&ArtifactKind::SymmetryResult),
        Some(&PathBuf::from("pilot_files/7_scale.symmetry.json"))
    );

    // Export consumes its parent's files positionally and leaves only logs.
    assert_eq!(
        controller.executor().argv(7),
        strings(&[
            "dials.export",
            "pilot_files/7_experiments.json",
            "pilot_files/7_reflections.pickle",
            "output.log=pilot_files/8_export.log",
            "output.debug_log=pilot_files/8_export.debug.log",
        ])
    );
    let export = controller.tree().node(8).expect("export step");
    assert_eq!(export.artifacts.len(), 2);
    assert!(export.artifacts.contains_key(&ArtifactKind::Log));

    // Nothing may follow an export.
    assert!(controller.tree().available_stages(8).expect("stages").is_empty());
}

#[test]
fn reindexing_applies_the_chosen_lattice_solution() {
    let (_temp, workspace) = temp_workspace().expect("workspace");
    let summary = r#"{
        "1": {"cb_op": "a,b,c", "bravais": "aP"},
        "2": {"cb_op": "-b,a,c", "bravais": "mC"}
    }"#;
    let executor = ScriptedExecutor::new(vec![
        ScriptedRun::success(),
        ScriptedRun::success(),
        ScriptedRun::success(),
        ScriptedRun::success().with_file("pilot_files/4_bravais_summary.json", summary),
        ScriptedRun::success(),
        ScriptedRun::success(),
    ]);
    let mut controller = RunController::open(workspace, executor).expect("open controller");

    run_stage(&mut controller, "import", &["/data/x.cbf"]);
    run_stage(&mut controller, "find_spots", &[]);
    run_stage(&mut controller, "index", &[]);
    run_stage(&mut controller, "refine_bravais_settings", &[]);
    let outcome = run_stage(&mut controller, "reindex", &["solution=2"]);
    assert_eq!(outcome.status, StepStatus::Succeeded);
    assert_eq!(outcome.line_number, 5);

    // The solution parameter is consumed, not forwarded; the reflections
    // come from the indexing step two levels up.
    assert_eq!(
        controller.executor().argv(4),
        strings(&[
            "dials.reindex",
            "input.reflections=pilot_files/3_reflections.pickle",
            "change_of_basis_op=-b,a,c",
            "output.reflections=pilot_files/5_reflections.pickle",
        ])
    );
    let reindex = controller.tree().node(5).expect("reindex step");
    assert_eq!(
        reindex.artifacts.get(&ArtifactKind::ExperimentDescription),
        Some(&PathBuf::from("pilot_files/4_bravais_setting_2.json"))
    );

    // The adopted solution file feeds the next refinement.
    run_stage(&mut controller, "refine", &[]);
    let refine_argv = controller.executor().argv(5);
    assert!(
        refine_argv.contains(&"input.experiments=pilot_files/4_bravais_setting_2.json".to_string()),
        "{refine_argv:?}"
    );
    assert!(
        refine_argv.contains(&"input.reflections=pilot_files/5_reflections.pickle".to_string()),
        "{refine_argv:?}"
    );
}

#[test]
fn a_failed_attempt_stays_in_history_and_a_sibling_retry_succeeds() {
    let (temp, workspace) = temp_workspace().expect("workspace");
    let executor = ScriptedExecutor::new(vec![
        ScriptedRun::success(),
        ScriptedRun::failure(1).with_lines(&["Sorry: no spots were found"]),
        ScriptedRun::success(),
    ]);
    let mut controller = RunController::open(workspace, executor).expect("open controller");

    run_stage(&mut controller, "import", &["/data/x.cbf"]);
    let failed = run_stage(&mut controller, "find_spots", &["sigma_strong=9"]);
    assert_eq!(failed.status, StepStatus::Failed);
    let log = temp
        .path()
        .join(failed.error_log.as_deref().expect("error log"));
    assert!(log.is_file());

    controller.goto(1).expect("goto import");
    let retry = run_stage(&mut controller, "find_spots", &[]);
    assert_eq!(retry.line_number, 3);
    assert_eq!(retry.status, StepStatus::Succeeded);

    // Both attempts visible, markers and all.
    let listing = HistoryRenderer::default().render(controller.tree());
    assert!(listing.contains(" F   2"), "{listing}");
    assert!(listing.contains(" S   3"), "{listing}");
}
