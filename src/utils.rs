use tracing::Level;

/// Shortens tool output and transcripts before they reach the logs.
pub fn truncate_log(text: &str) -> String {
    let (max_lines, max_chars) = if tracing::enabled!(Level::DEBUG) {
        (200, 15_000)
    } else {
        (20, 2_000)
    };
    truncate_impl(text, max_lines, max_chars)
}

fn truncate_impl(text: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();

    let clipped = if lines.len() <= max_lines {
        text.to_string()
    } else {
        let keep_head = max_lines / 2;
        let keep_tail = max_lines - keep_head;
        let head = lines[0..keep_head].join("\n");
        let tail = lines[lines.len() - keep_tail..].join("\n");
        format!(
            "{}\n\n[... Truncated {} lines ...]\n\n{}",
            head,
            lines.len() - max_lines,
            tail
        )
    };

    let total_chars = clipped.chars().count();
    if total_chars <= max_chars {
        clipped
    } else {
        let keep = max_chars / 2;
        let head: String = clipped.chars().take(keep).collect();
        let tail: String = clipped.chars().skip(total_chars - keep).collect();
        format!(
            "{}\n\n[... Truncated {} characters ...]\n\n{}",
            head,
            total_chars - max_chars,
            tail
        )
    }
}
