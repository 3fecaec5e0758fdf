// src/utils/log.rs

//! Run banners and summaries on top of the `log` facade.
//!
//! Plain messages go straight through `log::info!` and friends; these
//! helpers only give multi-line run output a consistent shape.

const RULE_WIDTH: usize = 60;

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(RULE_WIDTH);
    ::log::info!("{}", border);
    ::log::info!("  {}", title);
    ::log::info!("{}", border);
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    ::log::info!("    {}", message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    ::log::info!("{}", format_summary_line(title, items));
    for (key, value) in items {
        sub_item(&format!("{}: {}", key, value));
    }
}

/// Single-line form of a summary, e.g.
/// `[SUMMARY] Fetch: tickets fetched=250, pages failed=0`.
pub fn format_summary_line(title: &str, items: &[(&str, String)]) -> String {
    let fields = items
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[SUMMARY] {title}: {fields}")
}
