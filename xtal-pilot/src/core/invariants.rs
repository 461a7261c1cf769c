//! Structural checks over a restored or long-lived tree.

use crate::core::stage::{ROOT_SUCCESSORS, Stage};
use crate::tree::{ROOT_COMMAND, RunTree, StepNode};

/// Collect every structural violation in `tree`.
///
/// An empty result means the tree upholds the linkage, ordering, and
/// successor rules the rest of the crate assumes. Session restore treats
/// any violation as corrupt state; the `validate` command prints them.
pub fn validate(tree: &RunTree) -> Vec<String> {
    let mut violations = Vec::new();

    match tree.node(0) {
        Ok(root) => {
            if root.command != [ROOT_COMMAND] {
                violations.push(format!(
                    "root command is {:?}, expected [\"{ROOT_COMMAND}\"]",
                    root.command
                ));
            }
            if root.parent.is_some() {
                violations.push("the root step has a parent".to_string());
            }
        }
        Err(_) => violations.push("no root step at line 0".to_string()),
    }

    if tree.node(tree.current_line()).is_err() {
        violations.push(format!(
            "current step {} does not exist",
            tree.current_line()
        ));
    }

    for (line, node) in tree.iter() {
        if line != node.line_number {
            violations.push(format!(
                "step keyed {line} records line number {}",
                node.line_number
            ));
        }
        if node.line_number >= tree.next_line_number() {
            violations.push(format!(
                "step {} is not below the ordinal counter {}",
                node.line_number,
                tree.next_line_number()
            ));
        }
        if line != 0 && node.parent.is_none() {
            violations.push(format!("step {line} has no parent"));
        }
        if let Some(parent_line) = node.parent {
            match tree.node(parent_line) {
                Ok(parent) => {
                    if parent_line >= line {
                        violations.push(format!(
                            "step {line} does not come after its parent {parent_line}"
                        ));
                    }
                    if !parent.children.contains(&line) {
                        violations.push(format!(
                            "step {parent_line} does not list {line} as a child"
                        ));
                    }
                    check_successor(parent, node, &mut violations);
                }
                Err(_) => violations.push(format!(
                    "step {line} references missing parent {parent_line}"
                )),
            }
        }
        for &child in &node.children {
            match tree.node(child) {
                Ok(child_node) => {
                    if child_node.parent != Some(line) {
                        violations.push(format!(
                            "step {child} does not point back to parent {line}"
                        ));
                    }
                }
                Err(_) => {
                    violations.push(format!("step {line} references missing child {child}"));
                }
            }
        }
    }

    violations
}

fn check_successor(parent: &StepNode, node: &StepNode, violations: &mut Vec<String>) {
    // Placeholders carry no stage yet.
    let Some(first) = node.command.first() else {
        return;
    };
    let Some(stage) = Stage::parse(first) else {
        violations.push(format!(
            "step {} runs unknown stage '{first}'",
            node.line_number
        ));
        return;
    };
    let allowed: &[Stage] = if parent.is_root() {
        ROOT_SUCCESSORS
    } else {
        match parent.stage() {
            Some(parent_stage) => parent_stage.successors(),
            None => {
                violations.push(format!(
                    "step {} has a stage but its parent {} does not",
                    node.line_number, parent.line_number
                ));
                return;
            }
        }
    };
    if !allowed.contains(&stage) {
        violations.push(format!(
            "step {}: stage '{stage}' cannot follow '{}'",
            node.line_number,
            parent.command.first().map_or("(unset)", String::as_str)
        ));
    }
}
