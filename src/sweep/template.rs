//! `{name}`-style string templates
//!
//! Shared by command templates and the slug naming policy. Supports
//! `{name}`, `{name:g}` (compact numeric form) and `{{` / `}}` escapes.

use crate::error::{Result, SkyTrackError};

/// How a placeholder value is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSpec {
    /// Value as-is
    Plain,
    /// Shortest general numeric form (`%g`)
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { name: String, spec: FormatSpec },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    if !closed {
                        return Err(SkyTrackError::config(format!(
                            "unclosed '{{' in template '{}'",
                            source
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_field(source, &field)?);
                }
                '}' => {
                    return Err(SkyTrackError::config(format!(
                        "unmatched '}}' in template '{}'",
                        source
                    )));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render with a lookup; a placeholder the lookup cannot resolve is an error
    pub fn render<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str, FormatSpec) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { name, spec } => {
                    let value = lookup(name, *spec).ok_or_else(|| {
                        SkyTrackError::config(format!(
                            "template '{}' references unknown parameter '{}'",
                            self.source, name
                        ))
                    })?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn parse_field(source: &str, field: &str) -> Result<Segment> {
    let (name, spec) = match field.split_once(':') {
        Some((name, "g")) => (name, FormatSpec::Compact),
        Some((name, "")) => (name, FormatSpec::Plain),
        Some((_, other)) => {
            return Err(SkyTrackError::config(format!(
                "unsupported format spec ':{}' in template '{}'",
                other, source
            )))
        }
        None => (field, FormatSpec::Plain),
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(SkyTrackError::config(format!(
            "empty placeholder in template '{}'",
            source
        )));
    }

    Ok(Segment::Field {
        name: name.to_string(),
        spec,
    })
}

/// Format a number like C's `%g` with 6 significant digits
pub fn format_compact(value: f64) -> String {
    const PRECISION: i32 = 6;

    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }

    // Exponent after rounding to the target precision
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => return sci,
    };

    if exp < -4 || exp >= PRECISION {
        let mantissa = trim_fraction(&mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let t = Template::parse("python train.py --lr {lr} --bs {bs}").unwrap();
        assert_eq!(t.fields().collect::<Vec<_>>(), vec!["lr", "bs"]);

        let out = t
            .render(|name, _| match name {
                "lr" => Some("0.1".to_string()),
                "bs" => Some("32".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(out, "python train.py --lr 0.1 --bs 32");
    }

    #[test]
    fn test_escaped_braces() {
        let t = Template::parse("awk '{{print $1}}' {file}").unwrap();
        let out = t.render(|_, _| Some("x.txt".to_string())).unwrap();
        assert_eq!(out, "awk '{print $1}' x.txt");
    }

    #[test]
    fn test_format_spec() {
        let t = Template::parse("lr{lr:g}").unwrap();
        let out = t
            .render(|_, spec| {
                assert_eq!(spec, FormatSpec::Compact);
                Some("1e-05".to_string())
            })
            .unwrap();
        assert_eq!(out, "lr1e-05");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Template::parse("{unclosed").is_err());
        assert!(Template::parse("stray }").is_err());
        assert!(Template::parse("{}").is_err());
        assert!(Template::parse("{lr:.3f}").is_err());
    }

    #[test]
    fn test_unknown_placeholder() {
        let t = Template::parse("{missing}").unwrap();
        let err = t.render(|_, _| None).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_compact(0.01), "0.01");
        assert_eq!(format_compact(0.0001), "0.0001");
        assert_eq!(format_compact(1e-5), "1e-05");
        assert_eq!(format_compact(3e-4), "0.0003");
        assert_eq!(format_compact(2.0), "2");
        assert_eq!(format_compact(100000.0), "100000");
        assert_eq!(format_compact(1e6), "1e+06");
        assert_eq!(format_compact(0.123456789), "0.123457");
        assert_eq!(format_compact(-2.5), "-2.5");
        assert_eq!(format_compact(0.0), "0");
    }
}
