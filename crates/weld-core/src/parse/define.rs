use super::lexer::{tokenize, TokenKind};
use super::ParseError;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Replace `define`d identifiers and dotted paths (`process.env.NODE_ENV`) with their
/// replacement source text.
///
/// Works on tokens, so strings, comments, property accesses (`a.process`) and
/// object keys are left alone. Longer keys win over their prefixes.
pub fn apply_defines<'a>(
    source: &'a str,
    defines: &BTreeMap<String, String>,
) -> Result<Cow<'a, str>, ParseError> {
    if defines.is_empty() {
        return Ok(Cow::Borrowed(source));
    }

    let mut keys: Vec<(Vec<&str>, &str)> = defines
        .iter()
        .map(|(k, v)| (k.split('.').collect(), v.as_str()))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let toks = tokenize(source)?;
    let text = |i: usize| toks.get(i).map_or("", |t| t.text(source));
    let is_punct = |i: usize, p: &str| {
        toks.get(i)
            .is_some_and(|t| t.kind == TokenKind::Punct && t.text(source) == p)
    };

    let mut out = String::with_capacity(source.len());
    let mut copied = 0;
    let mut i = 0;
    while i < toks.len() {
        let t = &toks[i];
        let candidate = t.kind == TokenKind::Ident
            && !(i > 0 && (is_punct(i - 1, ".") || is_punct(i - 1, "?.")))
            && !(is_punct(i + 1, ":") && i > 0 && (is_punct(i - 1, "{") || is_punct(i - 1, ",")));

        let matched = candidate
            .then(|| {
                keys.iter().find(|(parts, _)| {
                    parts.iter().enumerate().all(|(n, part)| {
                        let at = i + n * 2;
                        toks.get(at).is_some_and(|t| t.kind == TokenKind::Ident)
                            && text(at) == *part
                            && (n == 0 || is_punct(at - 1, "."))
                    })
                })
            })
            .flatten();

        if let Some((parts, value)) = matched {
            let last = i + (parts.len() - 1) * 2;
            // Never rewrite an assignment target.
            if !is_punct(last + 1, "=") {
                out.push_str(&source[copied..t.start]);
                out.push_str(value);
                copied = toks[last].end;
                i = last + 1;
                continue;
            }
        }
        i += 1;
    }

    if copied == 0 {
        return Ok(Cow::Borrowed(source));
    }
    out.push_str(&source[copied..]);
    Ok(Cow::Owned(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_replaces_dotted_paths() {
        let d = defines(&[("process.env.NODE_ENV", "\"production\""), ("DEBUG", "false")]);
        let out = apply_defines(
            "if (process.env.NODE_ENV !== 'production' && DEBUG) log('process.env.NODE_ENV')",
            &d,
        )
        .unwrap();
        assert_eq!(
            out,
            "if (\"production\" !== 'production' && false) log('process.env.NODE_ENV')"
        );
    }

    #[test]
    fn test_skips_properties_keys_and_assignments() {
        let d = defines(&[("DEBUG", "false")]);
        let src = "a.DEBUG; x = { DEBUG: 1 }; DEBUG = true";
        assert!(matches!(apply_defines(src, &d).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_empty_defines_borrow() {
        let out = apply_defines("anything", &BTreeMap::new()).unwrap();
        assert!(matches!(out, Cow::Borrowed("anything")));
    }
}
