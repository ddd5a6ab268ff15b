//! Structural recovery for indentation-only trace bodies.

/// Indentation depth of a line: the count of leading whitespace characters.
pub fn line_depth(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Group consecutive lines by depth.
///
/// A line deeper than the previous one nests under it in the same group; a
/// line at equal or shallower depth closes the group and starts a new
/// sibling. Flat input therefore yields one singleton group per line. The
/// result borrows from the input; no buffers are shared or mutated across
/// recursion.
pub fn group_by_depth<'a>(lines: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut output = Vec::new();
    let mut group: Vec<&str> = Vec::new();

    for &line in lines {
        match group.last() {
            None => group.push(line),
            Some(prev) => {
                if line_depth(line) > line_depth(prev) {
                    group.push(line);
                } else {
                    output.push(std::mem::take(&mut group));
                    group.push(line);
                }
            }
        }
    }

    if !group.is_empty() {
        output.push(group);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_depth_counts_leading_whitespace() {
        assert_eq!(line_depth("no indent"), 0);
        assert_eq!(line_depth("  two"), 2);
        assert_eq!(line_depth("        eight"), 8);
        assert_eq!(line_depth(""), 0);
    }

    #[test]
    fn test_flat_input_yields_singleton_groups() {
        let lines = ["  a", "  b", "  c"];
        let groups = group_by_depth(&lines);
        assert_eq!(groups, vec![vec!["  a"], vec!["  b"], vec!["  c"]]);
    }

    #[test]
    fn test_nesting_relation_is_reproduced() {
        // Depths: 1 1 2 2 3 1 2
        let lines = [" a", " b", "  c", "  d", "   e", " f", "  g"];
        let groups = group_by_depth(&lines);
        assert_eq!(
            groups,
            vec![
                vec![" a"],
                vec![" b", "  c"],
                vec!["  d", "   e"],
                vec![" f", "  g"],
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        let groups = group_by_depth(&[]);
        assert!(groups.is_empty());
    }
}
