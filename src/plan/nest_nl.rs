use serde::{Deserialize, Serialize};

use crate::expr::Expr;

use super::Operator;

/// Nested-loop nest: evaluates the ON clause against every row produced by
/// `child` and collects the matches of the nested alias into an array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NLNest {
    alias: String,
    on_clause: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    outer: bool,
    #[serde(rename = "~child")]
    child: Box<Operator>,
}

impl NLNest {
    /// Nest of `alias` over `child`.
    pub fn new(child: Operator, alias: impl Into<String>, on_clause: &Expr, outer: bool) -> Self {
        Self {
            alias: alias.into(),
            on_clause: on_clause.to_string(),
            outer,
            child: Box::new(child),
        }
    }

    /// Rows without a match are kept.
    pub fn outer(&self) -> bool {
        self.outer
    }

    /// Alias the matches are nested under.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// ON clause in its string form.
    pub fn on_clause(&self) -> &str {
        &self.on_clause
    }

    /// Scan of the nested keyspace.
    pub fn child(&self) -> &Operator {
        &self.child
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn marshals_like_a_nested_loop_nest() {
        let child = Operator::PrimaryScan {
            index: "#primary".into(),
            keyspace: "orders".into(),
            alias: "o".into(),
            limit: None,
        };
        let on = Expr::path("o.cid").equals(Expr::meta_id("c"));
        let nest = Operator::NLNest(NLNest::new(child.clone(), "o", &on, false));
        let value = nest.to_json().unwrap();
        assert_eq!(value["#operator"], json!("NestedLoopNest"));
        assert_eq!(value["alias"], json!("o"));
        assert_eq!(value["on_clause"], json!(on.to_string()));
        assert!(value.get("outer").is_none());
        assert_eq!(value["~child"]["#operator"], json!("PrimaryScan"));

        let outer = Operator::NLNest(NLNest::new(child, "o", &on, true));
        let value = outer.to_json().unwrap();
        assert_eq!(value["outer"], json!(true));
        let back: Operator = serde_json::from_value(value).unwrap();
        assert_eq!(back, outer);
        assert_eq!(back.children().len(), 1);
    }
}
