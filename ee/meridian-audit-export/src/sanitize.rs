/// Neutralizes CSV/formula injection: a cell that would open with `=`, `+`,
/// `-` or `@` is prefixed with a single quote so spreadsheet software
/// treats it as text instead of evaluating it as a formula when the file
/// is opened.
pub fn sanitize_csv_cell(value: &str) -> String {
    match value.chars().next() {
        Some('=') | Some('+') | Some('-') | Some('@') => format!("'{value}"),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_formula_looking_cells() {
        assert_eq!(sanitize_csv_cell("=SUM(A1:A2)"), "'=SUM(A1:A2)");
        assert_eq!(sanitize_csv_cell("+1234"), "'+1234");
        assert_eq!(sanitize_csv_cell("-1234"), "'-1234");
        assert_eq!(sanitize_csv_cell("@mention"), "'@mention");
    }

    #[test]
    fn leaves_plain_cells_untouched() {
        assert_eq!(sanitize_csv_cell("hello world"), "hello world");
        assert_eq!(sanitize_csv_cell(""), "");
    }
}
