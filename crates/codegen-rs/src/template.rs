//! Symbol substitution and equation blocks.
//!
//! Equation text carries model references as `${...}` symbols. A [`Scope`]
//! knows how a symbol is spelled at one place of the generated program
//! (host member, device kernel argument, delayed pre-synaptic value, ...).

use neurogen_core::{Attribute, Method, NeurogenError, ObjectId, Result};

/// Symbol resolution at one emission site
pub trait Scope {
    fn resolve(&self, symbol: &str) -> Option<String>;
}

/// Where the rendered text runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// Member function of the host structure
    Host,
    /// Device kernel, state passed as pointer arguments
    Device,
}

/// Replace every `${symbol}` of `text`. An unknown or unterminated symbol
/// is an error naming the object and the emission context.
pub fn render(text: &str, scope: &dyn Scope, object: ObjectId, context: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| NeurogenError::UnresolvedSymbol {
            object,
            symbol: after.to_string(),
            context: context.to_string(),
        })?;
        let symbol = after[..end].trim();
        let resolved = scope
            .resolve(symbol)
            .ok_or_else(|| NeurogenError::UnresolvedSymbol {
                object,
                symbol: symbol.to_string(),
                context: context.to_string(),
            })?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Symbols referenced by `text`, in order of appearance
pub fn symbols(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                found.push(after[..end].trim());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    found
}

/// Indent every non-empty line by `level` steps of four spaces
pub fn indent(text: &str, level: usize) -> String {
    let pad = "    ".repeat(level);
    let mut out = String::with_capacity(text.len() + 16);
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(&pad);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Terminate a statement unless it already is a block or statement
pub fn statement(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.ends_with(';') || trimmed.ends_with('}') {
        trimmed.to_string()
    } else {
        format!("{};", trimmed)
    }
}

/// Per-step update of `attrs` in declared order.
///
/// Explicit equations are derivatives: they are all evaluated into `_name`
/// temporaries first and applied afterwards, so each one reads the state of
/// the previous step. Exact equations run in place. Parameters, attributes
/// without equation and event-driven attributes are skipped.
pub fn update_block<F>(attrs: &[&Attribute], mut render: F) -> Result<String>
where
    F: FnMut(&str, &Attribute) -> Result<String>,
{
    let mut code = String::new();
    let mut explicit = Vec::new();

    for attr in attrs.iter().filter(|a| a.is_updated()) {
        let Some(eq) = attr.eq.as_deref() else {
            continue;
        };
        match attr.method {
            Method::Explicit => {
                let rhs = render(eq, attr)?;
                code.push_str(&format!(
                    "{} _{} = {};\n",
                    attr.ctype,
                    attr.name,
                    rhs.trim_end().trim_end_matches(';')
                ));
                explicit.push(*attr);
            }
            Method::Exact => {
                code.push_str(&statement(&render(eq, attr)?));
                code.push('\n');
            }
            Method::EventDriven => {}
        }
    }

    for attr in explicit {
        let lhs = render(&format!("${{{}}}", attr.name), attr)?;
        code.push_str(&format!("{} += dt * _{};\n", lhs, attr.name));
    }
    Ok(code)
}

/// Closed-form catch-up of event-driven attributes, run at the start of an
/// event handler with `_elapsed` in scope.
pub fn event_block<F>(attrs: &[&Attribute], mut render: F) -> Result<String>
where
    F: FnMut(&str, &Attribute) -> Result<String>,
{
    let mut code = String::new();
    for attr in attrs
        .iter()
        .filter(|a| a.is_updated() && a.method == Method::EventDriven)
    {
        if let Some(eq) = attr.eq.as_deref() {
            code.push_str(&statement(&render(eq, attr)?));
            code.push('\n');
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_core::{AttrKind, Locality};

    struct Fixed;

    impl Scope for Fixed {
        fn resolve(&self, symbol: &str) -> Option<String> {
            match symbol {
                "r" => Some("r[i]".into()),
                "v" => Some("v[i]".into()),
                "sum.exc" => Some("_sum_exc[i]".into()),
                _ => None,
            }
        }
    }

    fn attr(name: &str, method: Method, eq: &str) -> Attribute {
        Attribute {
            name: name.into(),
            ctype: "double".into(),
            locality: Locality::Local,
            kind: AttrKind::Variable,
            method,
            init: "0.0".into(),
            eq: Some(eq.into()),
        }
    }

    #[test]
    fn test_render_substitutes() {
        let out = render("${r} = ${sum.exc};", &Fixed, ObjectId::Population(0), "update").unwrap();
        assert_eq!(out, "r[i] = _sum_exc[i];");
    }

    #[test]
    fn test_render_reports_unknown_symbol() {
        let err = render("${r} = ${pre.r};", &Fixed, ObjectId::Population(2), "update of 'r'")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "pop2: unresolved symbol '${pre.r}' in update of 'r'"
        );
    }

    #[test]
    fn test_render_reports_unterminated_symbol() {
        assert!(render("${r", &Fixed, ObjectId::Population(0), "x").is_err());
    }

    #[test]
    fn test_symbols() {
        assert_eq!(symbols("${w} * ${ pre.r } + 1"), vec!["w", "pre.r"]);
    }

    #[test]
    fn test_explicit_equations_read_previous_state() {
        let v = attr("v", Method::Explicit, "-${v} + ${r}");
        let r = attr("r", Method::Explicit, "${v} - ${r}");
        let code = update_block(&[&v, &r], |eq, a| {
            render(eq, &Fixed, ObjectId::Population(0), &a.name)
        })
        .unwrap();
        let lines: Vec<&str> = code.lines().collect();
        assert_eq!(lines[0], "double _v = -v[i] + r[i];");
        assert_eq!(lines[1], "double _r = v[i] - r[i];");
        assert_eq!(lines[2], "v[i] += dt * _v;");
        assert_eq!(lines[3], "r[i] += dt * _r;");
    }

    #[test]
    fn test_exact_and_event_driven() {
        let r = attr("r", Method::Exact, "${r} = ${sum.exc}");
        let v = attr("v", Method::EventDriven, "${v} = ${v} * exp(-_elapsed)");
        let render_fixed =
            |eq: &str, a: &Attribute| render(eq, &Fixed, ObjectId::Population(0), &a.name);

        assert_eq!(update_block(&[&r, &v], render_fixed).unwrap(), "r[i] = _sum_exc[i];\n");
        assert_eq!(
            event_block(&[&r, &v], render_fixed).unwrap(),
            "v[i] = v[i] * exp(-_elapsed);\n"
        );
    }

    #[test]
    fn test_indent_skips_blank_lines() {
        assert_eq!(indent("a;\n\nb;", 1), "    a;\n\n    b;\n");
    }
}
