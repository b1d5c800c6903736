//! Metric-name sanitizer: a pure function mapping arbitrary strings to
//! PromQL-valid identifiers. The first character, if not `[A-Za-z_]`,
//! becomes `_`; every subsequent character not in `[A-Za-z0-9_]` becomes
//! `_`.

pub fn sanitize_metric_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, ch) in raw.chars().enumerate() {
        let valid = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        out.push(if valid { ch } else { '_' });
    }
    out
}
