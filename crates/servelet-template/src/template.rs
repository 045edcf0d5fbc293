//! Placeholder templates
//!
//! A template is plain text with `${NAME}` placeholders. `${NAME:-default}`
//! supplies an inline default and `$$` produces a literal `$`. Substituted
//! values can be escaped for the syntax the template is written in.

use servelet_core::{RuntimeParameters, ServeletError, ServeletResult};
use tracing::warn;

/// How substituted values are escaped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Escape {
    /// Values are inserted verbatim
    #[default]
    None,
    /// Values are escaped for the inside of a TOML basic string (`"..."`)
    TomlString,
}

impl Escape {
    /// Escape one substituted value
    pub fn apply(self, value: &str, out: &mut String) {
        match self {
            Escape::None => out.push_str(value),
            Escape::TomlString => {
                for c in value.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
                        c => out.push(c),
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder {
        name: String,
        default: Option<String>,
    },
}

/// Parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template source
    pub fn parse(source: &str) -> ServeletResult<Self> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find('$') {
            text.push_str(&rest[..pos]);
            rest = &rest[pos..];

            if let Some(after) = rest.strip_prefix("$$") {
                text.push('$');
                rest = after;
            } else if let Some(after) = rest.strip_prefix("${") {
                let end = after.find('}').ok_or_else(|| {
                    ServeletError::Template(format!(
                        "Unterminated placeholder at line {}",
                        line_of(source, rest)
                    ))
                })?;
                let body = &after[..end];
                let (name, default) = match body.split_once(":-") {
                    Some((name, default)) => (name, Some(default.to_string())),
                    None => (body, None),
                };
                if !is_valid_name(name) {
                    return Err(ServeletError::Template(format!(
                        "Invalid placeholder name {:?} at line {}",
                        name,
                        line_of(source, rest)
                    )));
                }

                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Placeholder {
                    name: name.to_string(),
                    default,
                });
                rest = &after[end + 1..];
            } else {
                // A lone `$` is literal text
                text.push('$');
                rest = &rest[1..];
            }
        }
        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self { segments })
    }

    /// Placeholder names in order of first appearance
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder { name, .. } = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Names that resolve neither to a parameter nor to an inline default
    pub fn unresolved(&self, params: &RuntimeParameters) -> Vec<&str> {
        let mut missing: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder { name, default } = segment {
                if params.get(name).is_none()
                    && default.is_none()
                    && !missing.contains(&name.as_str())
                {
                    missing.push(name);
                }
            }
        }
        missing
    }

    /// Substitute every placeholder verbatim
    ///
    /// Fails with `MissingParameter` naming the first unresolved placeholder.
    pub fn render(&self, params: &RuntimeParameters) -> ServeletResult<String> {
        self.render_escaped(params, Escape::None)
    }

    /// Substitute every placeholder, escaping values with `escape`
    ///
    /// Template text and inline defaults are taken as written.
    pub fn render_escaped(
        &self,
        params: &RuntimeParameters,
        escape: Escape,
    ) -> ServeletResult<String> {
        let missing = self.unresolved(params);
        if let Some(first) = missing.first() {
            for name in &missing {
                warn!(parameter = %name, "Template parameter has no value and no default");
            }
            return Err(ServeletError::MissingParameter(first.to_string()));
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder { name, default } => match params.get(name) {
                    Some(value) => escape.apply(value, &mut out),
                    None => out.push_str(default.as_deref().unwrap_or_default()),
                },
            }
        }
        Ok(out)
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn line_of(source: &str, rest: &str) -> usize {
    let offset = source.len() - rest.len();
    source[..offset].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(vars: &[(&str, &str)]) -> RuntimeParameters {
        RuntimeParameters::from_vars(vars.iter().copied())
    }

    #[test]
    fn test_render_substitutes() {
        let template = Template::parse("--model_base_path=${MODEL_PATH} --port=${SERVING_PORT}")
            .unwrap();
        let out = template
            .render(&params(&[("MODEL_PATH", "/models/foo"), ("SERVING_PORT", "8500")]))
            .unwrap();
        assert_eq!(out, "--model_base_path=/models/foo --port=8500");
    }

    #[test]
    fn test_inline_default() {
        let template = Template::parse("name=${MODEL_NAME:-model}").unwrap();
        assert_eq!(template.render(&params(&[])).unwrap(), "name=model");
        assert_eq!(
            template.render(&params(&[("MODEL_NAME", "resnet")])).unwrap(),
            "name=resnet"
        );
    }

    #[test]
    fn test_empty_inline_default() {
        let template = Template::parse("[${EXTRA:-}]").unwrap();
        assert_eq!(template.render(&params(&[])).unwrap(), "[]");
    }

    #[test]
    fn test_missing_parameter() {
        let template = Template::parse("${A} ${B} ${A}").unwrap();
        let err = template.render(&params(&[])).unwrap_err();
        assert!(matches!(err, ServeletError::MissingParameter(name) if name == "A"));
        assert_eq!(template.unresolved(&params(&[])), vec!["A", "B"]);
    }

    #[test]
    fn test_escapes_and_literal_dollar() {
        let template = Template::parse("cost $$5 and $HOME stays").unwrap();
        assert_eq!(
            template.render(&params(&[])).unwrap(),
            "cost $5 and $HOME stays"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Template::parse("a\n${UNTERMINATED"),
            Err(ServeletError::Template(msg)) if msg.contains("line 2")
        ));
        assert!(Template::parse("${1BAD}").is_err());
        assert!(Template::parse("${}").is_err());
    }

    #[test]
    fn test_toml_string_escape() {
        let template = Template::parse(r#"path = "${MODEL_PATH}""#).unwrap();
        let p = params(&[("MODEL_PATH", "C:\\models\\t \"q\"\n")]);

        let out = template.render_escaped(&p, Escape::TomlString).unwrap();
        assert_eq!(out, r#"path = "C:\\models\\t \"q\"\n""#);
        assert_eq!(
            template.render(&p).unwrap(),
            "path = \"C:\\models\\t \"q\"\n\""
        );
    }

    #[test]
    fn test_toml_escape_leaves_defaults_alone() {
        let template = Template::parse(r#"a = "${A:-x\ty}""#).unwrap();
        let out = template.render_escaped(&params(&[]), Escape::TomlString).unwrap();
        assert_eq!(out, r#"a = "x\ty""#);
    }

    #[test]
    fn test_placeholders_order() {
        let template = Template::parse("${B}${A}${B:-x}").unwrap();
        assert_eq!(template.placeholders(), vec!["B", "A"]);
    }

    #[test]
    fn test_render_is_deterministic() {
        let template = Template::parse("${X}-${Y:-y}").unwrap();
        let p = params(&[("X", "1")]);
        let first = template.render(&p).unwrap();
        for _ in 0..10 {
            assert_eq!(template.render(&p).unwrap(), first);
        }
    }
}
