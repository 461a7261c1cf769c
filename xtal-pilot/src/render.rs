//! Plain-text rendering of the run history tree.
//!
//! The listing is the main navigation surface: one row per step in
//! depth-first order, a status marker, the line number used by `goto`,
//! and a `<<< here` pointer on the current step. Branch columns get a
//! `|` so sibling attempts stay visually attached to their parent.

use crate::tree::{RunTree, StepNode, StepStatus};

const HEADER: [&str; 5] = [
    "status",
    " |  line",
    " |   |  command",
    " |   |   |",
    "------------------",
];

/// Renders a [`RunTree`] as an indented listing.
#[derive(Debug, Clone)]
pub struct HistoryRenderer {
    /// Spaces added per tree depth level.
    indent: usize,
}

impl Default for HistoryRenderer {
    fn default() -> Self {
        Self { indent: 6 }
    }
}

struct Row {
    text: String,
    depth: usize,
    line: u32,
}

impl HistoryRenderer {
    pub fn render(&self, tree: &RunTree) -> String {
        let mut rows = Vec::with_capacity(tree.step_count());
        self.push_rows(tree, 0, 0, &mut rows);
        self.connect_branches(&mut rows);
        self.point_at_current(tree.current_line(), &mut rows);

        let max_depth = rows.iter().map(|row| row.depth).max().unwrap_or(0);
        let mut out: Vec<&str> = HEADER.to_vec();
        out.extend(rows.iter().map(|row| row.text.as_str()));
        let footer = "-".repeat(21 + self.indent * max_depth);
        out.push(&footer);
        out.join("\n")
    }

    fn push_rows(&self, tree: &RunTree, line: u32, depth: usize, rows: &mut Vec<Row>) {
        let Ok(node) = tree.node(line) else { return };
        rows.push(Row {
            text: self.row_text(node, depth),
            depth,
            line,
        });
        for &child in &node.children {
            self.push_rows(tree, child, depth + 1, rows);
        }
    }

    fn row_text(&self, node: &StepNode, depth: usize) -> String {
        format!(
            "{}{:>3}{}   \\___{}",
            marker(node.status),
            node.line_number,
            " ".repeat(self.indent * depth),
            node.label()
        )
    }

    /// Column of the connector for a row at `depth`.
    fn connector_col(&self, depth: usize) -> usize {
        9 + self.indent * depth
    }

    /// Draw a `|` through every deeper row between a step and the next
    /// sibling below it, walking upward from each row that returns to a
    /// shallower depth until a row of equal depth is reached.
    fn connect_branches(&self, rows: &mut [Row]) {
        for pos in 1..rows.len() {
            if rows[pos].depth >= rows[pos - 1].depth {
                continue;
            }
            let depth = rows[pos].depth;
            let col = self.connector_col(depth);
            for up in (1..pos).rev() {
                if rows[up].depth > depth {
                    // The column always falls inside the ASCII indent of a
                    // deeper row, so a byte splice is safe.
                    rows[up].text.replace_range(col..col + 1, "|");
                } else if rows[up].depth == depth {
                    break;
                }
            }
        }
    }

    fn point_at_current(&self, current: u32, rows: &mut [Row]) {
        let width = rows
            .iter()
            .map(|row| row.text.chars().count())
            .max()
            .unwrap_or(0);
        for row in rows {
            if row.line == current {
                let pad = width.saturating_sub(row.text.chars().count());
                row.text.push_str(&" ".repeat(pad));
                row.text.push_str("   <<< here");
            }
        }
    }
}

fn marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => " S ",
        StepStatus::Failed => " F ",
        StepStatus::Pending => " N ",
        StepStatus::Running => " R ",
    }
}
