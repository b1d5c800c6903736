//! Translates a parsed PromQL vector selector into the `source_id` set and
//! label constraints the `Queryable` bridge evaluates against local/remote
//! reads.

use promql_parser::label::MatchOp;
use promql_parser::parser::{Expr, VectorSelector};

use crate::PromqlError;

#[derive(Clone, Debug, PartialEq)]
pub enum LabelConstraint {
    Equal(String),
    NotEqual(String),
    RegexMatch(String),
    RegexNotMatch(String),
}

impl LabelConstraint {
    pub fn holds(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        match self {
            LabelConstraint::Equal(expected) => value == expected,
            LabelConstraint::NotEqual(expected) => value != expected,
            LabelConstraint::RegexMatch(pattern) => regex_matches(pattern, value),
            LabelConstraint::RegexNotMatch(pattern) => !regex_matches(pattern, value),
        }
    }
}

fn regex_matches(pattern: &str, value: &str) -> bool {
    let anchored = format!("^(?:{pattern})$");
    regex::Regex::new(&anchored)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// A vector selector reduced to the pieces the `Queryable` bridge needs:
/// the metric name (`__name__`), the `source_id` values to fan reads out
/// to, and the remaining label constraints every matching point must
/// satisfy.
pub struct Selector {
    pub metric_name: Option<String>,
    pub source_ids: Vec<String>,
    pub other_constraints: Vec<(String, LabelConstraint)>,
}

/// Extracts a `Selector` from a parsed query. Only bare vector selectors
/// are supported — aggregation, binary operators, and PromQL functions are
/// rejected with `PromqlError::Unsupported`.
pub fn extract_selector(expr: &Expr) -> Result<Selector, PromqlError> {
    let Expr::VectorSelector(vs) = expr else {
        return Err(PromqlError::Unsupported(
            "only bare vector selectors are supported".to_string(),
        ));
    };
    selector_from_vector_selector(vs)
}

fn selector_from_vector_selector(vs: &VectorSelector) -> Result<Selector, PromqlError> {
    let mut source_ids = Vec::new();
    let mut other_constraints = Vec::new();

    for matcher in vs.matchers.matchers.iter() {
        if matcher.name == "source_id" {
            match &matcher.op {
                MatchOp::Equal => source_ids.push(matcher.value.clone()),
                MatchOp::Re(_) => {
                    source_ids.extend(split_regex_alternatives(&matcher.value));
                }
                other => {
                    return Err(PromqlError::BadData(format!(
                        "unsupported source_id matcher: {other:?}"
                    )))
                }
            }
            continue;
        }
        if matcher.name == "__name__" {
            continue;
        }
        let constraint = match &matcher.op {
            MatchOp::Equal => LabelConstraint::Equal(matcher.value.clone()),
            MatchOp::NotEqual => LabelConstraint::NotEqual(matcher.value.clone()),
            MatchOp::Re(_) => LabelConstraint::RegexMatch(matcher.value.clone()),
            MatchOp::NotRe(_) => LabelConstraint::RegexNotMatch(matcher.value.clone()),
        };
        other_constraints.push((matcher.name.clone(), constraint));
    }

    if source_ids.is_empty() {
        return Err(PromqlError::BadData("missing source_id".to_string()));
    }

    Ok(Selector {
        metric_name: vs.name.clone(),
        source_ids,
        other_constraints,
    })
}

/// Rewrites every `source_id="KEY"` equality matcher in `query` whose
/// `KEY` appears in `sets` into either a literal equality (a singleton
/// set) or a regex-alternation matcher (multiple values), per §4.8's
/// closing scenario. `query` is treated as text, not re-parsed and
/// re-printed, since only this one matcher shape needs rewriting and the
/// rest of the expression must come through byte-for-byte unchanged.
///
/// `ReplaceSourceIdSets("metric{source_id=\"A\"}", {"A": ["x","y"]})` →
/// `metric{source_id=~"x|y"}`; a singleton set stays an equality matcher.
pub fn replace_source_id_sets(query: &str, sets: &std::collections::HashMap<String, Vec<String>>) -> String {
    let pattern = regex::Regex::new(r#"source_id="([^"]*)""#).expect("static pattern");
    pattern
        .replace_all(query, |caps: &regex::Captures| {
            let key = &caps[1];
            match sets.get(key) {
                Some(values) if values.len() == 1 => format!(r#"source_id="{}""#, values[0]),
                Some(values) if !values.is_empty() => {
                    format!(r#"source_id=~"{}""#, values.join("|"))
                }
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Splits a regex alternation like `a|b|c` into its literal alternatives.
/// Only plain alternation is supported; anything with other regex syntax
/// is treated as a single opaque alternative (queries with more exotic
/// `source_id` regexes simply issue one Read for the whole pattern,
/// matching nothing if no source_id is literally that string).
fn split_regex_alternatives(pattern: &str) -> Vec<String> {
    pattern.split('|').map(|s| s.to_string()).collect()
}
