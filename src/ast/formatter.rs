/// SQL layout post-pass.
///
/// Renderers emit clause breaks as `\n`. In pretty mode each line is
/// indented by the parenthesis depth it starts at and long lines are
/// wrapped; otherwise every break collapses to a single space. Text inside
/// quotes is never touched.
use unicode_width::UnicodeWidthStr;

const INDENT: &str = "  ";
const MAX_WIDTH: usize = 80;

/// Lay out rendered SQL text.
pub fn flatten_sql(sql: &str, pretty: bool) -> String {
    let lines = split_lines(sql);
    if !pretty {
        let mut out = String::with_capacity(sql.len());
        for line in lines.iter().filter(|l| !l.text.is_empty()) {
            if !out.is_empty() && !out.ends_with('(') && !line.text.starts_with(')') {
                out.push(' ');
            }
            out.push_str(&line.text);
        }
        return out;
    }
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines.iter().filter(|l| !l.text.is_empty()) {
        let prefix = INDENT.repeat(line.depth);
        wrap_line(&prefix, &line.text, &mut out);
    }
    out.join("\n")
}

struct Line {
    /// Open parentheses before the line starts.
    depth: usize,
    text: String,
}

impl Line {
    /// Lines opening with `)` sit at the depth they close back to.
    fn new(depth: usize, text: &str) -> Self {
        let text = text.trim();
        let closing = text.chars().take_while(|c| *c == ')').count();
        Line {
            depth: depth.saturating_sub(closing),
            text: text.to_string(),
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Scan {
    single: bool,
    double: bool,
}

impl Scan {
    fn in_quotes(&self) -> bool {
        self.single || self.double
    }

    fn step(&mut self, c: char) {
        match c {
            '\'' if !self.double => self.single = !self.single,
            '"' if !self.single => self.double = !self.double,
            _ => {}
        }
    }
}

/// Split on breaks outside quotes, tracking paren depth.
fn split_lines(sql: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut scan = Scan::default();
    let mut depth: usize = 0;
    let mut line_depth: usize = 0;
    let mut current = String::new();
    for c in sql.chars() {
        if c == '\n' && !scan.in_quotes() {
            lines.push(Line::new(line_depth, &current));
            current.clear();
            line_depth = depth;
            continue;
        }
        scan.step(c);
        if !scan.in_quotes() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        current.push(c);
    }
    lines.push(Line::new(line_depth, &current));
    lines
}

/// Byte offsets of spaces outside quotes, with a flag for preferred breaks.
fn break_points(text: &str) -> Vec<(usize, bool)> {
    let mut points = Vec::new();
    let mut scan = Scan::default();
    for (i, c) in text.char_indices() {
        scan.step(c);
        if c != ' ' || scan.in_quotes() {
            continue;
        }
        let before = text[..i].trim_end();
        let after = &text[i + 1..];
        let preferred = before.ends_with(',')
            || starts_with_word(after, "and")
            || starts_with_word(after, "or");
        points.push((i, preferred));
    }
    points
}

fn starts_with_word(s: &str, word: &str) -> bool {
    s.get(..word.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(word))
        && s.as_bytes().get(word.len()) == Some(&b' ')
}

fn wrap_line(prefix: &str, text: &str, out: &mut Vec<String>) {
    let continuation = format!("{}{}", prefix, INDENT);
    let mut rest = text;
    let mut lead = prefix;
    loop {
        let budget = MAX_WIDTH.saturating_sub(lead.width());
        if rest.width() <= budget {
            out.push(format!("{}{}", lead, rest));
            return;
        }
        let points = break_points(rest);
        let fits: Vec<(usize, bool)> = points
            .iter()
            .copied()
            .filter(|(i, _)| rest[..*i].width() <= budget)
            .collect();
        let split = fits
            .iter()
            .rev()
            .find(|(_, preferred)| *preferred)
            .or_else(|| fits.last())
            .or_else(|| points.first())
            .map(|(i, _)| *i);
        let Some(split) = split.filter(|i| *i > 0) else {
            out.push(format!("{}{}", lead, rest));
            return;
        };
        out.push(format!("{}{}", lead, rest[..split].trim_end()));
        rest = rest[split..].trim_start();
        lead = &continuation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_flat_joins_breaks() {
        assert_eq!(
            flatten_sql("select a from t\nwhere a = 1\norder by a", false),
            "select a from t where a = 1 order by a"
        );
    }

    #[test]
    fn test_breaks_in_quotes_are_kept() {
        assert_eq!(
            flatten_sql("select 'a\nb' from t\nwhere x = 1", false),
            "select 'a\nb' from t where x = 1"
        );
    }

    #[test]
    fn test_sub_select_is_indented() {
        let sql = "select a from t\nwhere exists (select 1 from k\nwhere k.id = t.id)";
        assert_eq!(
            flatten_sql(sql, true),
            "select a from t\nwhere exists (select 1 from k\n  where k.id = t.id)"
        );
    }

    #[test]
    fn test_closing_paren_outdents() {
        let sql = "select * from (\nselect * from t\n) where rownum <= 10";
        assert_eq!(
            flatten_sql(sql, true),
            "select * from (\n  select * from t\n) where rownum <= 10"
        );
        assert_eq!(
            flatten_sql(sql, false),
            "select * from (select * from t) where rownum <= 10"
        );
    }

    #[test]
    fn test_long_line_wraps_after_comma() {
        let columns: Vec<String> = (0..12).map(|i| format!("column_number_{}", i)).collect();
        let sql = format!("select {} from t", columns.join(", "));
        let out = flatten_sql(&sql, true);
        for line in out.lines() {
            assert!(line.width() <= MAX_WIDTH, "line too long: {}", line);
        }
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines.len() > 1);
        assert!(lines[0].ends_with(','));
        assert!(lines[1].starts_with("  column_number_"));
        assert_eq!(flatten_sql(&out, false).replace("  ", " "), sql);
    }

    #[test]
    fn test_wrap_prefers_connectives() {
        let sql = format!(
            "where {} = 1 and {} = 2",
            "a".repeat(40),
            "b".repeat(40)
        );
        let out = flatten_sql(&sql, true);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].trim_start().starts_with("and "));
    }

    #[test]
    fn test_wrap_with_non_ascii_identifiers() {
        let sql = format!("select {} from t where 日付 = 1 or 日付 = 2", "x".repeat(90));
        let out = flatten_sql(&sql, true);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.first(), Some(&"select"));
        assert_eq!(lines.last(), Some(&"  from t where 日付 = 1 or 日付 = 2"));
        assert!(starts_with_word("or 日付", "or"));
        assert!(!starts_with_word("日付 = 1", "or"));
        assert!(!starts_with_word("order", "or"));
    }
}
