//! Query templates with brace placeholders.
//!
//! Query text refers to parameters as `{name}`. A literal brace is written
//! doubled (`{{` or `}}`). Templates are parsed once when loaded, so malformed
//! text is reported before any period runs.

use thiserror::Error;

use backfill_core::Params;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("no value for parameter '{0}'")]
    MissingParam(String),

    #[error("unbalanced '{brace}' at byte {offset}")]
    UnbalancedBrace { brace: char, offset: usize },

    #[error("empty placeholder '{{}}' at byte {offset}")]
    EmptyPlaceholder { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl QueryTemplate {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let segments = parse_segments(&source)?;
        Ok(Self { source, segments })
    }

    /// The unrendered template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Referenced parameter names, in order of first use.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every placeholder from `params`.
    pub fn render(&self, params: &Params) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingParam(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn parse_segments(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(TemplateError::UnbalancedBrace { brace: '}', offset }),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, '{')) | None => {
                            return Err(TemplateError::UnbalancedBrace { brace: '{', offset })
                        }
                        Some((_, ch)) => name.push(ch),
                    }
                }
                if name.is_empty() {
                    return Err(TemplateError::EmptyPlaceholder { offset });
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_named_placeholders() {
        let t = QueryTemplate::parse(
            "select * from usage where dt between '{start_date}' and '{end_date}'",
        )
        .unwrap();
        let sql = t
            .render(&params(&[("start_date", "2023-06-01"), ("end_date", "2023-06-30")]))
            .unwrap();
        assert_eq!(
            sql,
            "select * from usage where dt between '2023-06-01' and '2023-06-30'"
        );
    }

    #[test]
    fn doubled_braces_are_literals() {
        let t = QueryTemplate::parse("select map('k', 1) as m, '{{{tag}}}' as t").unwrap();
        assert_eq!(t.placeholders(), vec!["tag"]);
        assert_eq!(
            t.render(&params(&[("tag", "cal")])).unwrap(),
            "select map('k', 1) as m, '{cal}' as t"
        );
    }

    #[test]
    fn missing_param_is_reported_by_name() {
        let t = QueryTemplate::parse("insert into {tmp_env}.x select 1").unwrap();
        assert_eq!(
            t.render(&Params::new()).unwrap_err(),
            TemplateError::MissingParam("tmp_env".into())
        );
    }

    #[test]
    fn unbalanced_braces_fail_at_parse() {
        assert_eq!(
            QueryTemplate::parse("select '{start_date'").unwrap_err(),
            TemplateError::UnbalancedBrace {
                brace: '{',
                offset: 8
            }
        );
        assert_eq!(
            QueryTemplate::parse("select 1 }").unwrap_err(),
            TemplateError::UnbalancedBrace {
                brace: '}',
                offset: 9
            }
        );
        assert!(matches!(
            QueryTemplate::parse("select {}"),
            Err(TemplateError::EmptyPlaceholder { offset: 7 })
        ));
    }

    #[test]
    fn placeholders_are_deduplicated_in_order() {
        let t = QueryTemplate::parse("{b} {a} {b} {c}").unwrap();
        assert_eq!(t.placeholders(), vec!["b", "a", "c"]);
    }

    #[test]
    fn extra_params_are_ignored() {
        let t = QueryTemplate::parse("select 1").unwrap();
        assert_eq!(t.render(&params(&[("unused", "x")])).unwrap(), "select 1");
        assert_eq!(t.source(), "select 1");
    }
}
