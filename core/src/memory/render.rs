use super::types::{LongTermMemory, TurnView};

/// Serialise the tiers into the text handed to planners and decision
/// services. Token accounting is done on this output.
pub fn render_context(
    long_term: &LongTermMemory,
    medium: &[TurnView],
    short: &[TurnView],
    working: &[TurnView],
) -> String {
    let mut out = String::new();
    out.push_str("[CONTEXT v1]\n");

    if let Some(project) = &long_term.project_context {
        out.push_str("## Project\n");
        out.push_str(project);
        out.push('\n');
    }
    if !long_term.preferences.is_empty() {
        out.push_str("## Preferences\n");
        for p in &long_term.preferences {
            out.push_str(&format!("- {p}\n"));
        }
    }
    if !long_term.archived_facts.is_empty() {
        out.push_str("## Facts\n");
        for f in &long_term.archived_facts {
            out.push_str(&format!("- {f}\n"));
        }
    }
    out.push_str(&format!(
        "## Stats\nturns={} tokens={} plans={}\n",
        long_term.stats.turns,
        long_term.stats.tokens,
        long_term.stats.plans.len()
    ));

    for (title, turns) in [("Medium-term", medium), ("Short-term", short), ("Working", working)] {
        if turns.is_empty() {
            continue;
        }
        out.push_str(&format!("## {title}\n"));
        for turn in turns {
            for m in &turn.messages {
                out.push_str(&format!("[{}] {}: {}\n", turn.index, m.role.as_str(), m.content));
            }
            for f in &turn.key_facts {
                out.push_str(&format!("[{}] fact: {f}\n", turn.index));
            }
        }
    }

    out.push_str("[/CONTEXT]\n");
    out
}
