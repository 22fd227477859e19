//! Column label normalization
//!
//! Produces the comparison key used by the matcher: full-width forms are
//! folded to half-width, whitespace and punctuation/marker characters are
//! dropped, and the result is lower-cased.

/// CJK punctuation that has no half-width counterpart
const CJK_PUNCTUATION: &[char] = &[
    '、', '。', '〈', '〉', '《', '》', '「', '」', '『', '』', '【', '】', '〔', '〕', '〖', '〗',
    '“', '”', '‘', '’', '·', '•', '—', '–', '…', '※', '★', '☆', '●', '○',
];

/// Normalize a raw column label into its comparison key
pub fn normalize(label: &str) -> String {
    label
        .chars()
        .map(fold_width)
        .filter(|&c| !is_noise(c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Map full-width ASCII variants (U+FF01..=U+FF5E) onto their ASCII forms
fn fold_width(c: char) -> char {
    match c {
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        other => other,
    }
}

fn is_noise(c: char) -> bool {
    c.is_whitespace()
        || (c.is_ascii_punctuation() && c != '_')
        || CJK_PUNCTUATION.contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_whitespace() {
        assert_eq!(normalize(" 学号 "), normalize("学号"));
        assert_eq!(normalize("学 号"), "学号");
        assert_eq!(normalize("学号\u{3000}"), "学号");
    }

    #[test]
    fn test_strips_required_marker() {
        assert_eq!(normalize("*学生姓名"), "学生姓名");
        assert_eq!(normalize("＊学生姓名"), "学生姓名");
    }

    #[test]
    fn test_strips_full_and_half_width_punctuation() {
        assert_eq!(normalize("学生姓名（中文）"), "学生姓名中文");
        assert_eq!(normalize("学生姓名(中文)"), "学生姓名中文");
        assert_eq!(normalize("【班级】"), "班级");
    }

    #[test]
    fn test_case_folds_and_keeps_underscore() {
        assert_eq!(normalize("Student_ID"), "student_id");
        assert_eq!(normalize("ＳＣＯＲＥ"), "score");
    }

    #[test]
    fn test_idempotent() {
        for label in ["  *学号 ", "Student_ID", "学生姓名（中文）", "", "***"] {
            let once = normalize(label);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_noise_only_label_is_empty() {
        assert_eq!(normalize(" * "), "");
    }
}
