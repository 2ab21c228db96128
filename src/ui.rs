use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message to stderr
pub fn dim_err(msg: &str) {
    eprintln!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

/// Print a line-based diff between `old` and `new`, indented.
pub fn diff(old: &str, new: &str) {
    print!("{}", render_diff(old, new));
}

/// Render changed lines of a diff, `-`/`+` prefixed and colored.
pub fn render_diff(old: &str, new: &str) -> String {
    let diff = similar::TextDiff::from_lines(old, new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let line = match change.tag() {
            similar::ChangeTag::Delete => format!("- {change}").red().to_string(),
            similar::ChangeTag::Insert => format!("+ {change}").green().to_string(),
            similar::ChangeTag::Equal => continue,
        };
        out.push_str("    ");
        out.push_str(&line);
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
