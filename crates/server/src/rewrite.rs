//! Pattern-based URL rewriting from the route rules file.
//!
//! Patterns match segment-wise: `:name` captures one segment, `*` captures
//! the remainder. Targets substitute `:name` and positional `$1..$n`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use jsonwatch_core::RouteRules;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Param(String),
    Wildcard,
}

#[derive(Debug, Clone)]
struct Rule {
    tokens: Vec<Token>,
    target: String,
}

/// Compiled rule set; first match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleRewriter {
    rules: Arc<Vec<Rule>>,
}

impl RuleRewriter {
    pub fn new(rules: &RouteRules) -> Self {
        let rules = rules
            .iter()
            .map(|(pattern, target)| Rule {
                tokens: tokenize(pattern),
                target: target.to_string(),
            })
            .collect();
        Self { rules: Arc::new(rules) }
    }

    /// Rewritten path-and-query, or `None` when no rule matches.
    pub fn rewrite(&self, path: &str, query: Option<&str>) -> Option<String> {
        self.rules.iter().find_map(|rule| {
            let captures = match_tokens(&rule.tokens, path)?;
            let mut out = substitute(&rule.target, &captures);
            if let Some(query) = query.filter(|q| !q.is_empty()) {
                out.push(if out.contains('?') { '&' } else { '?' });
                out.push_str(query);
            }
            Some(out)
        })
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    pattern
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| match segment {
            "*" => Token::Wildcard,
            s if s.starts_with(':') => Token::Param(s[1..].to_string()),
            s => Token::Literal(s.to_string()),
        })
        .collect()
}

/// Named and positional captures, in pattern order.
type Captures = Vec<(Option<String>, String)>;

fn match_tokens(tokens: &[Token], path: &str) -> Option<Captures> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let mut captures = Captures::new();
    let mut index = 0;

    for (position, token) in tokens.iter().enumerate() {
        match token {
            Token::Literal(expected) => {
                if segments.get(index) != Some(&expected.as_str()) {
                    return None;
                }
                index += 1;
            }
            Token::Param(name) => {
                let segment = segments.get(index)?;
                captures.push((Some(name.clone()), (*segment).to_string()));
                index += 1;
            }
            Token::Wildcard => {
                // Only a trailing wildcard may swallow several segments.
                if position + 1 == tokens.len() {
                    captures.push((None, segments[index.min(segments.len())..].join("/")));
                    index = segments.len();
                } else {
                    let segment = segments.get(index)?;
                    captures.push((None, (*segment).to_string()));
                    index += 1;
                }
            }
        }
    }

    (index == segments.len()).then_some(captures)
}

fn substitute(target: &str, captures: &Captures) -> String {
    let mut out = target.to_string();
    // Longest names first so `:ids` is not clobbered by `:id`.
    let mut named: Vec<_> = captures
        .iter()
        .filter_map(|(name, value)| name.as_ref().map(|n| (n, value)))
        .collect();
    named.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    for (name, value) in named {
        out = out.replace(&format!(":{name}"), value);
    }
    // Highest positions first so `$1` does not clobber `$10`.
    for (position, (_, value)) in captures.iter().enumerate().rev() {
        out = out.replace(&format!("${}", position + 1), value);
    }
    out
}

/// Middleware: apply the rule set before routing.
pub async fn rewrite_by_rules(State(rewriter): State<RuleRewriter>, mut req: Request) -> Result<Request, Response> {
    let Some(rewritten) = rewriter.rewrite(req.uri().path(), req.uri().query()) else {
        return Ok(req);
    };
    debug!(from = %req.uri(), to = %rewritten, "route rule rewrite");
    *req.uri_mut() = rewritten
        .parse::<Uri>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;
    Ok(req)
}
